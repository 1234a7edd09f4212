//! 应用层（courier-application）
//!
//! 进程内 CQRS 事件分发，以及把事件转交到事务性发件箱的桥接：
//! - `cqrs::CqrsEventDispatcher`：按事件类型登记处理器，同步或后台执行，逐处理器重试；
//! - `cqrs::OutboxForwardingHandler`：在调用方工作单元内把事件写入发件箱；
//! - `context::AppContext`：一次应用层调用的操作者与工作单元。
//!
pub mod context;
pub mod cqrs;
pub mod error;

pub use cqrs::CqrsEventDispatcher;

// 允许在本 crate 内部通过 ::courier_application 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::courier_application 路径。
extern crate self as courier_application;
