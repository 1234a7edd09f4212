//! 幂等消费（InboxConsumer）
//!
//! 一条消息对一个逻辑消费者的处理流程：
//! 1. 以 `{tracking_id}_{consumer}` 为主键插入 `New` 行，主键冲突即视为重复投递；
//! 2. 条件认领 `New → Processing`，失败说明另一实例正在处理；
//! 3. 开启工作单元执行处理器，并在同一工作单元内暂存 `Processed` 标记后提交；
//! 4. 处理器失败则回滚并记为 `Failed`，交由重处理器按退避策略重试。
//!
use super::{InboxConfig, InboxMessage};
use crate::envelope::{ActorContext, BusMessage};
use crate::error::MessagingResult as Result;
use crate::persist::{InboxRepository, InsertOutcome};
use crate::status::ConsumeStatus;
use crate::uow::{UnitOfWork, UnitOfWorkManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 消费侧上下文：信封携带的操作者与本次处理的工作单元
pub struct ConsumeContext {
    actor: ActorContext,
    unit_of_work: Arc<dyn UnitOfWork>,
}

impl ConsumeContext {
    pub fn new(actor: ActorContext, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        Self {
            actor,
            unit_of_work,
        }
    }

    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    /// 副作用应写入该工作单元，与 `Processed` 标记一起提交
    pub fn unit_of_work(&self) -> &Arc<dyn UnitOfWork> {
        &self.unit_of_work
    }
}

/// 类型化消息消费者
#[async_trait]
pub trait BusMessageConsumer<P>: Send + Sync
where
    P: Send + Sync + 'static,
{
    /// 逻辑消费者名，参与收件箱主键
    fn consumer_name(&self) -> &str;

    async fn handle(&self, ctx: &ConsumeContext, message: &BusMessage<P>) -> anyhow::Result<()>;
}

#[async_trait]
impl<P, T> BusMessageConsumer<P> for Arc<T>
where
    P: Send + Sync + 'static,
    T: BusMessageConsumer<P> + ?Sized,
{
    fn consumer_name(&self) -> &str {
        (**self).consumer_name()
    }

    async fn handle(&self, ctx: &ConsumeContext, message: &BusMessage<P>) -> anyhow::Result<()> {
        (**self).handle(ctx, message).await
    }
}

/// 单次消费结果；均视为“已受理”，不向总线回报失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Processed,
    /// 同一消费者已见过该追踪 ID
    Duplicate,
    /// 行已被其他实例认领
    ClaimedElsewhere,
    /// 处理失败，已记录并等待重试
    Failed,
}

pub struct InboxConsumer {
    repository: Arc<dyn InboxRepository>,
    unit_of_work_manager: Arc<dyn UnitOfWorkManager>,
    config: InboxConfig,
}

impl InboxConsumer {
    pub fn new(
        repository: Arc<dyn InboxRepository>,
        unit_of_work_manager: Arc<dyn UnitOfWorkManager>,
        config: InboxConfig,
    ) -> Self {
        Self {
            repository,
            unit_of_work_manager,
            config,
        }
    }

    pub fn repository(&self) -> &Arc<dyn InboxRepository> {
        &self.repository
    }

    pub fn config(&self) -> &InboxConfig {
        &self.config
    }

    pub async fn consume<P, C>(&self, consumer: &C, message: &BusMessage<P>) -> Result<ConsumeOutcome>
    where
        P: Serialize + Send + Sync + 'static,
        C: BusMessageConsumer<P> + ?Sized,
    {
        let raw = message.to_json()?;
        self.consume_raw(consumer, message, &raw, Utc::now()).await
    }

    /// 以收到的原始报文入箱，避免重新序列化
    pub(crate) async fn consume_raw<P, C>(
        &self,
        consumer: &C,
        message: &BusMessage<P>,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>
    where
        P: Send + Sync + 'static,
        C: BusMessageConsumer<P> + ?Sized,
    {
        let row = InboxMessage::from_raw(
            message.tracking_id().as_str(),
            consumer.consumer_name(),
            message.routing_key().as_str(),
            raw.to_string(),
        );

        if self.repository.try_insert(row.clone()).await? == InsertOutcome::Duplicate {
            debug!(
                tracking_id = row.tracking_id(),
                consumer = row.consumer_by(),
                "duplicate delivery ignored"
            );
            return Ok(ConsumeOutcome::Duplicate);
        }

        let claimed = self
            .repository
            .try_claim(row.id(), ConsumeStatus::New, row.version(), now)
            .await?;
        match claimed {
            Some(claimed) => self.process_claimed(consumer, message, claimed, now).await,
            None => Ok(ConsumeOutcome::ClaimedElsewhere),
        }
    }

    /// 执行已认领的行（首次消费与重处理共用）
    pub(crate) async fn process_claimed<P, C>(
        &self,
        consumer: &C,
        message: &BusMessage<P>,
        claimed: InboxMessage,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>
    where
        P: Send + Sync + 'static,
        C: BusMessageConsumer<P> + ?Sized,
    {
        let uow = match self.unit_of_work_manager.begin().await {
            Ok(uow) => uow,
            Err(e) => return self.fail(&claimed, &e.to_string(), now).await,
        };
        let ctx = ConsumeContext::new(message.actor(), uow.clone());

        if let Err(e) = consumer.handle(&ctx, message).await {
            if let Err(rb) = uow.rollback().await {
                warn!(inbox_id = claimed.id(), error = %rb, "inbox rollback failed");
            }
            return self.fail(&claimed, &format!("{e:#}"), now).await;
        }

        let committed = match uow.mark_inbox_processed(&claimed).await {
            Ok(()) => uow.complete().await,
            Err(e) => {
                if let Err(rb) = uow.rollback().await {
                    warn!(inbox_id = claimed.id(), error = %rb, "inbox rollback failed");
                }
                Err(e)
            }
        };
        match committed {
            Ok(()) => {
                debug!(
                    tracking_id = claimed.tracking_id(),
                    consumer = claimed.consumer_by(),
                    "inbox message processed"
                );
                Ok(ConsumeOutcome::Processed)
            }
            Err(e) => self.fail(&claimed, &e.to_string(), now).await,
        }
    }

    pub(crate) async fn fail(
        &self,
        claimed: &InboxMessage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let retry_count = claimed.retry_count().saturating_add(1);
        let next_retry_time =
            self.config
                .backoff
                .next_retry_time(now, self.config.retry_interval_seconds, retry_count);

        if !self
            .repository
            .mark_failed(claimed, reason, next_retry_time, now)
            .await?
        {
            warn!(inbox_id = claimed.id(), "inbox claim lost before failure was recorded");
            return Ok(ConsumeOutcome::ClaimedElsewhere);
        }

        if retry_count > self.config.max_retry_count {
            error!(
                tracking_id = claimed.tracking_id(),
                consumer = claimed.consumer_by(),
                retry_count,
                error = reason,
                "inbox message exceeded retry limit, left as dead letter"
            );
        } else {
            warn!(
                tracking_id = claimed.tracking_id(),
                consumer = claimed.consumer_by(),
                retry_count,
                %next_retry_time,
                error = reason,
                "inbox consume failed, scheduled for retry"
            );
        }
        Ok(ConsumeOutcome::Failed)
    }
}
