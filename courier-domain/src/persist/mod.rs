//! 持久化（persist）
//!
//! 定义发件箱/收件箱仓储协议与其实现：
//! - `OutboxRepository` / `InboxRepository`：行的插入、清扫候选、条件认领与状态推进；
//! - `InMemoryMessageStore`：单进程内存实现，同时充当工作单元工厂；
//! - `PgMessageStore`（`infra-sqlx` 特性）：基于 Postgres 的实现。
//!
//! 状态列上的条件更新是跨进程的唯一并发控制手段，任何实现都必须保持该语义。
//!
mod inbox_repository;
mod inmemory;
mod outbox_repository;
#[cfg(feature = "infra-sqlx")]
mod postgres;
pub(crate) mod selection;

pub use inbox_repository::{InboxRepository, InsertOutcome};
pub use inmemory::{InMemoryMessageStore, InMemoryUnitOfWork};
pub use outbox_repository::OutboxRepository;
#[cfg(feature = "infra-sqlx")]
pub use postgres::{PgMessageStore, PgUnitOfWork};
