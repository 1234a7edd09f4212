//! 收件箱重处理（InboxReprocessor）
//!
//! 周期拉取到期的失败行，条件认领后按消费者名重新执行；
//! 超过重试上限的行留在 `Failed` 作为死信，仅供查询。
//!
use super::registry::{ConsumeReport, ConsumerRegistry};
use super::InboxMessage;
use crate::persist::selection::stale_before;
use crate::error::MessagingResult as Result;
use crate::inbox::ConsumeOutcome;
use crate::status::ConsumeStatus;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct InboxReprocessor {
    registry: Arc<ConsumerRegistry>,
}

impl InboxReprocessor {
    pub fn new(registry: Arc<ConsumerRegistry>) -> Self {
        Self { registry }
    }

    pub async fn process_once(&self, now: DateTime<Utc>) -> Result<ConsumeReport> {
        let inbox = self.registry.inbox();
        let config = inbox.config();
        let rows = inbox
            .repository()
            .fetch_retry_candidates(now, config.batch_size, config.max_retry_count)
            .await?;
        if rows.is_empty() {
            return Ok(ConsumeReport::default());
        }

        let report = stream::iter(rows)
            .map(|row| self.retry_row(row, now))
            .buffer_unordered(config.consumer_concurrency.max(1))
            .fold(ConsumeReport::default(), |mut acc, result| async move {
                acc.record(&result);
                acc
            })
            .await;

        info!(
            processed = report.processed,
            failed = report.failed,
            claimed_elsewhere = report.claimed_elsewhere,
            errors = report.errors,
            "inbox reprocess finished"
        );
        Ok(report)
    }

    async fn retry_row(&self, row: InboxMessage, now: DateTime<Utc>) -> Result<ConsumeOutcome> {
        let claimed = self
            .registry
            .inbox()
            .repository()
            .try_claim(row.id(), ConsumeStatus::Failed, row.version(), now)
            .await?;
        let Some(claimed) = claimed else {
            return Ok(ConsumeOutcome::ClaimedElsewhere);
        };
        let result = self.registry.process_claimed(claimed, now).await;
        if let Err(e) = &result {
            error!(inbox_id = row.id(), consumer = row.consumer_by(), error = %e, "inbox retry failed");
        }
        result
    }

    /// 将超时的 `New/Processing` 行退回 `Failed`
    pub async fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let inbox = self.registry.inbox();
        let cutoff = stale_before(now, inbox.config().processing_timeout);
        let n = inbox.repository().reclaim_stale(cutoff, now).await?;
        if n > 0 {
            warn!(reclaimed = n, "stale inbox rows returned to failed");
        }
        Ok(n)
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<InboxMessage>> {
        let inbox = self.registry.inbox();
        inbox
            .repository()
            .dead_letters(inbox.config().max_retry_count, limit)
            .await
    }
}
