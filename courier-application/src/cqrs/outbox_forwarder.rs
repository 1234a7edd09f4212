use super::handler::{CqrsEventHandler, HandlerContext};
use super::CqrsEvent;
use async_trait::async_trait;
use courier_domain::envelope::{BusMessage, RoutingKey};
use courier_domain::outbox::{OutboxProducer, OutboxSendOptions};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// 把 CQRS 事件转交到发件箱的处理器
///
/// 总是在调用方任务内同步执行，事件与业务写入落在同一工作单元中；
/// 调用方没有工作单元时退化为直接入箱。
/// 路由键为 `{EVENT_TYPE}.{producer}.{EVENT_NAME}.{action}`。
pub struct OutboxForwardingHandler<E> {
    producer: Arc<OutboxProducer>,
    name: String,
    sub_queue_prefix: Option<String>,
    _event: PhantomData<fn() -> E>,
}

impl<E: CqrsEvent> OutboxForwardingHandler<E> {
    pub fn new(producer: Arc<OutboxProducer>) -> Self {
        Self {
            producer,
            name: format!("OutboxForwarding.{}", E::EVENT_NAME),
            sub_queue_prefix: None,
            _event: PhantomData,
        }
    }

    /// 同一分区的事件按发生顺序投递
    pub fn with_sub_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sub_queue_prefix = Some(prefix.into());
        self
    }

    pub fn routing_key_for(&self, event: &E) -> RoutingKey {
        RoutingKey::compose(
            E::EVENT_TYPE,
            self.producer.producer_name(),
            E::EVENT_NAME,
            event.event_action(),
        )
    }
}

#[async_trait]
impl<E> CqrsEventHandler<E> for OutboxForwardingHandler<E>
where
    E: CqrsEvent + Clone,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    fn force_current_thread(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &HandlerContext, event: &E) -> anyhow::Result<()> {
        let message = BusMessage::new(
            event.clone(),
            self.producer.producer_name(),
            ctx.actor(),
            self.routing_key_for(event),
        );
        let options = OutboxSendOptions::builder()
            .maybe_sub_queue_prefix(self.sub_queue_prefix.clone())
            .maybe_unit_of_work(ctx.unit_of_work().cloned())
            .build();
        let sent = self.producer.send_message(message, options).await?;
        debug!(
            tracking_id = %sent.tracking_id(),
            routing_key = %sent.routing_key(),
            audit_track_id = %event.metadata().audit_track_id(),
            "cqrs event forwarded to outbox"
        );
        Ok(())
    }
}
