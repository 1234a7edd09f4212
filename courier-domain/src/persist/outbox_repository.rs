use crate::error::MessagingResult;
use crate::outbox::OutboxMessage;
use crate::status::SendStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 发件箱仓储
///
/// 所有状态写入都是条件更新：`status = 期望状态 AND version = 期望版本`，
/// 影响行数为 0 即视为被其他实例抢先，不报错。
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// 直接写入（不在事务内，尽力而为）
    async fn insert(&self, message: OutboxMessage) -> MessagingResult<()>;

    async fn get(&self, id: &str) -> MessagingResult<Option<OutboxMessage>>;

    /// 拉取可清扫的行：`New/Failed`、`next_retry_time <= now`、`retry_count <= max_retry_count`，
    /// 按 `(sub_queue_prefix, created_date)` 升序；若同分区更早的行仍在处理中或等待重试，则该分区后续行不返回。
    async fn fetch_sweep_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_retry_count: u32,
    ) -> MessagingResult<Vec<OutboxMessage>>;

    /// 同分区是否还有更早的、未处理完且不是死信的行；无分区的行返回 `false`
    async fn has_pending_predecessor(
        &self,
        message: &OutboxMessage,
        max_retry_count: u32,
    ) -> MessagingResult<bool>;

    /// 认领：条件成立时置为 `Processing` 并返回更新后的行，否则返回 `None`
    async fn try_claim(
        &self,
        id: &str,
        expected_status: SendStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> MessagingResult<Option<OutboxMessage>>;

    async fn mark_processed(
        &self,
        claimed: &OutboxMessage,
        now: DateTime<Utc>,
    ) -> MessagingResult<bool>;

    async fn mark_failed(
        &self,
        claimed: &OutboxMessage,
        error: &str,
        next_retry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MessagingResult<bool>;

    /// 将 `last_updated_date < stale_before` 的 `Processing` 行退回 `Failed`
    async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MessagingResult<usize>;

    /// 超过重试上限、滞留在 `Failed` 的行
    async fn dead_letters(
        &self,
        max_retry_count: u32,
        limit: usize,
    ) -> MessagingResult<Vec<OutboxMessage>>;
}

#[async_trait]
impl<T> OutboxRepository for Arc<T>
where
    T: OutboxRepository + ?Sized,
{
    async fn insert(&self, message: OutboxMessage) -> MessagingResult<()> {
        (**self).insert(message).await
    }

    async fn get(&self, id: &str) -> MessagingResult<Option<OutboxMessage>> {
        (**self).get(id).await
    }

    async fn fetch_sweep_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_retry_count: u32,
    ) -> MessagingResult<Vec<OutboxMessage>> {
        (**self)
            .fetch_sweep_candidates(now, batch_size, max_retry_count)
            .await
    }

    async fn has_pending_predecessor(
        &self,
        message: &OutboxMessage,
        max_retry_count: u32,
    ) -> MessagingResult<bool> {
        (**self)
            .has_pending_predecessor(message, max_retry_count)
            .await
    }

    async fn try_claim(
        &self,
        id: &str,
        expected_status: SendStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> MessagingResult<Option<OutboxMessage>> {
        (**self)
            .try_claim(id, expected_status, expected_version, now)
            .await
    }

    async fn mark_processed(
        &self,
        claimed: &OutboxMessage,
        now: DateTime<Utc>,
    ) -> MessagingResult<bool> {
        (**self).mark_processed(claimed, now).await
    }

    async fn mark_failed(
        &self,
        claimed: &OutboxMessage,
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
    ) -> MessagingResult<Vec<OutboxMessage>> {
        (**self).dead_letters(max_retry_count, limit).await
    }
}
