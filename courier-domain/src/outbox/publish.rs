use super::{OutboxConfig, OutboxMessage};
use crate::bus::MessageBusProducer;
use crate::error::MessagingResult as Result;
use crate::persist::OutboxRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 单行投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Published,
    Failed,
    /// 认领或状态推进时发现行已被其他实例改写
    LostClaim,
}

/// 认领 → 发布 → 标记，立即发送与清扫共用
#[derive(Clone)]
pub(crate) struct OutboxPublisher {
    repository: Arc<dyn OutboxRepository>,
    bus: Arc<dyn MessageBusProducer>,
    config: OutboxConfig,
}

impl OutboxPublisher {
    pub(crate) fn new(
        repository: Arc<dyn OutboxRepository>,
        bus: Arc<dyn MessageBusProducer>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            repository,
            bus,
            config,
        }
    }

    pub(crate) fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub(crate) fn repository(&self) -> &Arc<dyn OutboxRepository> {
        &self.repository
    }

    pub(crate) async fn claim_and_publish(
        &self,
        row: &OutboxMessage,
        now: DateTime<Utc>,
    ) -> Result<RowOutcome> {
        let claimed = self
            .repository
            .try_claim(row.id(), row.send_status(), row.version(), now)
            .await?;
        let Some(claimed) = claimed else {
            debug!(tracking_id = row.id(), "outbox row claimed elsewhere");
            return Ok(RowOutcome::LostClaim);
        };
        self.publish_claimed(claimed, now).await
    }

    async fn publish_claimed(&self, claimed: OutboxMessage, now: DateTime<Utc>) -> Result<RowOutcome> {
        match self.bus.publish(claimed.routing_key(), claimed.message()).await {
            Ok(()) => {
                if self.repository.mark_processed(&claimed, now).await? {
                    debug!(
                        tracking_id = claimed.id(),
                        routing_key = claimed.routing_key(),
                        "outbox message published"
                    );
                    Ok(RowOutcome::Published)
                } else {
                    // 已发布但状态被回收改写：之后会重发，由收件箱去重兜底
                    warn!(tracking_id = claimed.id(), "outbox claim lost after publish");
                    Ok(RowOutcome::LostClaim)
                }
            }
            Err(e) => {
                let retry_count = claimed.retry_count().saturating_add(1);
                let interval = claimed
                    .retry_interval_seconds()
                    .unwrap_or(self.config.default_retry_interval_seconds);
                let next_retry_time = self.config.backoff.next_retry_time(now, interval, retry_count);
                let reason = e.to_string();

                if !self
                    .repository
                    .mark_failed(&claimed, &reason, next_retry_time, now)
                    .await?
                {
                    warn!(tracking_id = claimed.id(), "outbox claim lost after failed publish");
                    return Ok(RowOutcome::LostClaim);
                }

                if retry_count > self.config.max_retry_count {
                    error!(
                        tracking_id = claimed.id(),
                        routing_key = claimed.routing_key(),
                        retry_count,
                        error = %e,
                        "outbox message exceeded retry limit, left as dead letter"
                    );
                } else {
                    warn!(
                        tracking_id = claimed.id(),
                        routing_key = claimed.routing_key(),
                        retry_count,
                        %next_retry_time,
                        error = %e,
                        "outbox publish failed, scheduled for retry"
                    );
                }
                Ok(RowOutcome::Failed)
            }
        }
    }
}
