//! 可靠消息投递领域库（courier-domain）
//!
//! 在“业务提交”与“总线发布”之间建立可靠的衔接，保证至少一次投递、至多一次副作用：
//! - 信封与身份模型（`envelope`）：追踪 ID、操作者上下文、路由键；
//! - 事务性发件箱（`outbox`）：随业务事务入箱，清扫器按分区 FIFO 发布并按退避重试；
//! - 幂等收件箱（`inbox`）：以 `{tracking_id}_{consumer}` 去重，副作用与完成标记同事务提交；
//! - 端口（`bus`、`persist`、`uow`）与内存实现，可选 Postgres 实现（`infra-sqlx`）；
//! - 引擎（`engine`）：托管清扫、重处理、超时回收与订阅等长驻任务。
//!
//! 典型用法：
//! 1. 为载荷实现 `BusMessagePayload`（或使用 `#[bus_message]`）；
//! 2. 在工作单元内调用 `OutboxProducer::send`，随业务写入一起提交；
//! 3. 在消费端登记 `BusMessageConsumer`，交给 `MessagingEngine` 订阅与重试。
//!
pub mod backoff;
pub mod bus;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod inbox;
pub mod outbox;
pub mod persist;
pub mod status;
pub mod uow;

// 允许在本 crate 内部通过 ::courier_domain 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::courier_domain 路径。
extern crate self as courier_domain;
