use crate::error::MessagingResult;
use crate::inbox::InboxMessage;
use crate::status::ConsumeStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 插入结果：唯一约束冲突不是错误，而是“已见过”
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// 收件箱仓储
#[async_trait]
pub trait InboxRepository: Send + Sync {
    async fn try_insert(&self, message: InboxMessage) -> MessagingResult<InsertOutcome>;

    async fn get(&self, id: &str) -> MessagingResult<Option<InboxMessage>>;

    /// `Failed`、`next_retry_time <= now`、`retry_count <= max_retry_count`，按创建时间升序
    async fn fetch_retry_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_retry_count: u32,
    ) -> MessagingResult<Vec<InboxMessage>>;

    async fn try_claim(
        &self,
        id: &str,
        expected_status: ConsumeStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> MessagingResult<Option<InboxMessage>>;

    async fn mark_failed(
        &self,
        claimed: &InboxMessage,
        error: &str,
        next_retry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MessagingResult<bool>;

    /// 将超时的 `New/Processing` 行退回 `Failed`
    async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MessagingResult<usize>;

    async fn dead_letters(
        &self,
        max_retry_count: u32,
        limit: usize,
    ) -> MessagingResult<Vec<InboxMessage>>;
}

#[async_trait]
impl<T> InboxRepository for Arc<T>
where
    T: InboxRepository + ?Sized,
{
    async fn try_insert(&self, message: InboxMessage) -> MessagingResult<InsertOutcome> {
        (**self).try_insert(message).await
    }

    async fn get(&self, id: &str) -> MessagingResult<Option<InboxMessage>> {
        (**self).get(id).await
    }

    async fn fetch_retry_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_retry_count: u32,
    ) -> MessagingResult<Vec<InboxMessage>> {
        (**self)
            .fetch_retry_candidates(now, batch_size, max_retry_count)
            .await
    }

    async fn try_claim(
        &self,
        id: &str,
        expected_status: ConsumeStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> MessagingResult<Option<InboxMessage>> {
        (**self)
            .try_claim(id, expected_status, expected_version, now)
            .await
    }

    async fn mark_failed(
        &self,
        claimed: &InboxMessage,
        error: &str,
        next_retry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MessagingResult<bool> {
        (**self)
            .mark_failed(claimed, error, next_retry_time, now)
            .await
    }

    async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MessagingResult<usize> {
        (**self).reclaim_stale(stale_before, now).await
    }

    async fn dead_letters(
        &self,
        max_retry_count: u32,
        limit: usize,
    ) -> MessagingResult<Vec<InboxMessage>> {
        (**self).dead_letters(max_retry_count, limit).await
    }
}
