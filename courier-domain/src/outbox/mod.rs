//! 事务性发件箱（outbox）
//!
//! - `OutboxMessage`：发件箱行；
//! - `OutboxProducer`：在业务事务内入箱，提交后尝试立即发布；
//! - `OutboxSweeper`：周期清扫未发布的行，失败按退避策略重试；
//! - `OutboxConfig`：批量、重试上限、超时与并发配置。
//!
mod config;
mod message;
mod producer;
mod publish;
mod sweeper;

pub use config::OutboxConfig;
pub use message::OutboxMessage;
pub use producer::{OutboxProducer, OutboxSendOptions};
pub use publish::RowOutcome;
pub use sweeper::{OutboxSweeper, SweepReport};
