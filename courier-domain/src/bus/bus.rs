use crate::envelope::BusMessage;
use crate::error::MessagingResult as Result;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 总线交付的原始报文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBusDelivery {
    routing_key: String,
    payload: String,
}

impl RawBusDelivery {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// 消息生产者：发布到主题/交换机
#[async_trait]
pub trait MessageBusProducer: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: &str) -> Result<()>;
}

/// 类型化发送：序列化信封后按其路由键发布，返回原消息
#[async_trait]
pub trait MessageBusProducerExt: MessageBusProducer {
    async fn send<P>(&self, message: BusMessage<P>) -> Result<BusMessage<P>>
    where
        P: Serialize + Send + Sync + 'static,
    {
        let raw = message.to_json()?;
        self.publish(message.routing_key().as_str(), &raw).await?;
        Ok(message)
    }
}

impl<T> MessageBusProducerExt for T where T: MessageBusProducer + ?Sized {}

/// 消息消费者：返回一个 'static 生命周期的报文流，便于在 tokio::spawn 中使用
#[async_trait]
pub trait MessageBusConsumer: Send + Sync {
    async fn subscribe(&self) -> BoxStream<'static, Result<RawBusDelivery>>;
}

#[async_trait]
impl<T> MessageBusProducer for Arc<T>
where
    T: MessageBusProducer + ?Sized,
{
    async fn publish(&self, routing_key: &str, payload: &str) -> Result<()> {
        (**self).publish(routing_key, payload).await
    }
}
