//! 幂等收件箱（inbox）
//!
//! - `InboxMessage`：收件箱行，主键即去重键；
//! - `InboxConsumer`：插入去重 → 认领 → 在工作单元内执行并标记完成；
//! - `ConsumerRegistry`：按路由键模式登记类型化消费者；
//! - `InboxReprocessor`：失败行的周期重试、超时回收与死信查询。
//!
mod config;
mod consumer;
mod message;
mod registry;
mod reprocessor;

pub use config::InboxConfig;
pub use consumer::{BusMessageConsumer, ConsumeContext, ConsumeOutcome, InboxConsumer};
pub use message::InboxMessage;
pub use registry::{ConsumeReport, ConsumerRegistry};
pub use reprocessor::InboxReprocessor;
