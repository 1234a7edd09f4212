//! 内存版消息总线（InMemoryMessageBus）
//!
//! 基于 `tokio::sync::broadcast` 实现的轻量总线，同时满足生产与消费协议：
//! - `publish`：克隆并广播报文，同时记入发布历史；
//! - `subscribe`：返回 `'static` 生命周期报文流；
//! - `set_available(false)`：模拟中间件不可达，发布直接失败。
//!
//! 注意：若无订阅者时发送将被忽略，不视为错误。

use super::{MessageBusConsumer, MessageBusProducer, RawBusDelivery};
use crate::error::{MessagingError, MessagingResult as Result};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone)]
pub struct InMemoryMessageBus {
    tx: broadcast::Sender<RawBusDelivery>,
    available: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<RawBusDelivery>>>,
}

impl InMemoryMessageBus {
    /// 创建一个内存总线，`capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            available: Arc::new(AtomicBool::new(true)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 已成功发布的报文（按发布顺序）
    pub fn published(&self) -> Vec<RawBusDelivery> {
        self.published
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBusProducer for InMemoryMessageBus {
    async fn publish(&self, routing_key: &str, payload: &str) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MessagingError::message_bus("broker unreachable"));
        }
        let delivery = RawBusDelivery::new(routing_key, payload);
        if let Ok(mut g) = self.published.lock() {
            g.push(delivery.clone());
        }
        // 若当前无订阅者，broadcast 的 send 会返回错误，这里视为非致命并忽略
        let _ = self.tx.send(delivery);
        Ok(())
    }
}

#[async_trait]
impl MessageBusConsumer for InMemoryMessageBus {
    async fn subscribe(&self) -> BoxStream<'static, Result<RawBusDelivery>> {
        let rx = self.tx.subscribe();
        let stream =
            BroadcastStream::new(rx).map(|r| r.map_err(|e| MessagingError::message_bus(e.to_string())));
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBusProducerExt;
    use crate::envelope::{ActorContext, BusMessage, RoutingKey};

    #[tokio::test]
    async fn publish_reaches_subscriber_and_history() {
        let bus = InMemoryMessageBus::new(16);
        let mut stream = bus.subscribe().await;

        let msg = BusMessage::new("hello".to_string(), "svc", &ActorContext::system(), RoutingKey::new("a.b"));
        let sent = bus.send(msg).await.unwrap();

        let got = stream.next().await.unwrap().unwrap();
        assert_eq!(got.routing_key(), "a.b");
        let back = BusMessage::<String>::from_json(got.payload()).unwrap();
        assert_eq!(back.tracking_id(), sent.tracking_id());
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_broker_rejects_publish() {
        let bus = InMemoryMessageBus::new(4);
        bus.set_available(false);
        let err = bus.publish("k", "{}").await.unwrap_err();
        assert!(matches!(err, MessagingError::MessageBus { .. }));
        assert!(bus.published().is_empty());
    }
}
