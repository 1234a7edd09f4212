//! CQRS 事件（cqrs）
//!
//! - `CqrsEvent` / `CqrsEventMetadata`：进程内事件及其审计元数据；
//! - `CqrsEventHandler` / `HandlerContext`：处理器协议与执行上下文；
//! - `CqrsEventDispatcher`：按类型分发，同步或后台执行，逐处理器重试；
//! - `OutboxForwardingHandler`：把事件写入事务性发件箱。
//!
mod dispatcher;
mod event;
mod handler;
mod outbox_forwarder;

pub use dispatcher::{
    CqrsEventDispatcher, DispatchReport, DispatcherConfig, HandlerExecutionState,
};
pub use event::{CqrsEvent, CqrsEventMetadata};
pub use handler::{CqrsEventHandler, HandlerContext};
pub use outbox_forwarder::OutboxForwardingHandler;
