//! 发件箱生产者（OutboxProducer）
//!
//! 调用方在业务事务内调用 `send`：
//! - 存在活动的工作单元：行随事务暂存，提交时一起落盘，提交后回调尝试立即发布；
//! - 不存在：直接写入发件箱（尽力而为），随后按配置立即尝试发布。
//!
//! 立即发布与清扫器走同一条认领路径，谁先认领谁发布。
//! 分区内仍有更早的待发行时不立即发布，交给清扫器按序投递。
//!
use super::publish::OutboxPublisher;
use super::{OutboxConfig, OutboxMessage};
use crate::bus::MessageBusProducer;
use crate::envelope::{ActorContext, BusMessage, BusMessagePayload, RoutingKey};
use crate::error::MessagingResult as Result;
use crate::persist::OutboxRepository;
use crate::uow::UnitOfWork;
use bon::Builder;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// 单次发送的可选参数
#[derive(Builder, Default, Clone)]
pub struct OutboxSendOptions {
    /// 覆盖按载荷解析出的路由键
    routing_key: Option<RoutingKey>,
    retry_interval_seconds: Option<u64>,
    /// 分区键；同一分区的消息按创建顺序投递
    #[builder(into)]
    sub_queue_prefix: Option<String>,
    unit_of_work: Option<Arc<dyn UnitOfWork>>,
}

pub struct OutboxProducer {
    producer_name: String,
    publisher: OutboxPublisher,
}

impl OutboxProducer {
    /// `producer_name` 写入信封的 `produce_from`，并参与默认路由键的拼装
    pub fn new(
        producer_name: impl Into<String>,
        repository: Arc<dyn OutboxRepository>,
        bus: Arc<dyn MessageBusProducer>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            producer_name: producer_name.into(),
            publisher: OutboxPublisher::new(repository, bus, config),
        }
    }

    pub fn producer_name(&self) -> &str {
        &self.producer_name
    }

    /// 以当前操作者上下文封装载荷并入箱
    pub async fn send<P>(
        &self,
        ctx: &ActorContext,
        payload: P,
        options: OutboxSendOptions,
    ) -> Result<BusMessage<P>>
    where
        P: BusMessagePayload + Serialize + Send + Sync + 'static,
    {
        let routing_key = options
            .routing_key
            .clone()
            .unwrap_or_else(|| RoutingKey::resolve(&payload, &self.producer_name));
        let message = BusMessage::new(payload, self.producer_name.as_str(), ctx, routing_key);
        self.send_message(message, options).await
    }

    /// 入箱一条已构造好的信封
    pub async fn send_message<P>(
        &self,
        message: BusMessage<P>,
        options: OutboxSendOptions,
    ) -> Result<BusMessage<P>>
    where
        P: Serialize + Send + Sync + 'static,
    {
        let message = match options.routing_key {
            Some(key) => message.with_routing_key(key),
            None => message,
        };
        let unit_of_work = options.unit_of_work.filter(|u| u.is_active());
        let row = OutboxMessage::from_bus_message(
            &message,
            options.sub_queue_prefix,
            options.retry_interval_seconds,
            unit_of_work.as_ref().map(|u| u.id().to_string()),
        )?;
        let immediate = self.publisher.config().immediate_send;

        match unit_of_work {
            Some(uow) => {
                uow.insert_outbox(row.clone()).await?;
                debug!(
                    tracking_id = row.id(),
                    routing_key = row.routing_key(),
                    transaction = uow.id(),
                    "outbox message staged"
                );
                if immediate {
                    let publisher = self.publisher.clone();
                    uow.on_completed(Box::new(move || {
                        Box::pin(async move {
                            publish_now(&publisher, &row).await;
                        })
                    }));
                }
            }
            None => {
                self.publisher.repository().insert(row.clone()).await?;
                debug!(
                    tracking_id = row.id(),
                    routing_key = row.routing_key(),
                    "outbox message stored without unit of work"
                );
                if immediate {
                    publish_now(&self.publisher, &row).await;
                }
            }
        }

        Ok(message)
    }
}

// 立即发布失败不影响调用方：行已落盘，清扫器会接手
async fn publish_now(publisher: &OutboxPublisher, row: &OutboxMessage) {
    if row.sub_queue_prefix().is_some() {
        let max_retry_count = publisher.config().max_retry_count;
        match publisher
            .repository()
            .has_pending_predecessor(row, max_retry_count)
            .await
        {
            Ok(false) => {}
            Ok(true) => {
                debug!(
                    tracking_id = row.id(),
                    partition = row.sub_queue_prefix(),
                    "earlier rows pending in partition, left to sweeper"
                );
                return;
            }
            Err(e) => {
                warn!(tracking_id = row.id(), error = %e, "partition order check failed");
                return;
            }
        }
    }
    if let Err(e) = publisher.claim_and_publish(row, Utc::now()).await {
        warn!(tracking_id = row.id(), error = %e, "immediate outbox publish failed");
    }
}
