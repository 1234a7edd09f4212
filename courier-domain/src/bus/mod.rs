//! 消息总线端口（bus）
//!
//! 仅定义与外部消息中间件交互的最小协议：
//! - `MessageBusProducer`：按路由键发布原始报文；
//! - `MessageBusConsumer`：以 'static 事件流交付 `(routing_key, raw_payload)`；
//! - `InMemoryMessageBus`：基于 `tokio::sync::broadcast` 的内存实现。
//!
mod bus;
mod bus_inmemory;

pub use bus::{MessageBusConsumer, MessageBusProducer, MessageBusProducerExt, RawBusDelivery};
pub use bus_inmemory::InMemoryMessageBus;
