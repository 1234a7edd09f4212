//! 工作单元（Unit of Work）协议
//!
//! 业务写入与发件箱插入共处同一事务；消费侧的副作用与收件箱“已处理”标记同样共处一个事务。
//! 工作单元以显式参数沿调用链传递，而不是挂在线程或任务局部状态上。
//!
use crate::error::MessagingResult;
use crate::inbox::InboxMessage;
use crate::outbox::OutboxMessage;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::sync::Arc;

/// 事务提交后执行的回调；回滚时被丢弃
pub type CompletedAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// 事务 ID，记录到发件箱行的 `source_transaction_id`
    fn id(&self) -> &str;

    /// 尚未提交或回滚
    fn is_active(&self) -> bool;

    /// 暂存一条发件箱行，随事务提交一起落盘
    async fn insert_outbox(&self, message: OutboxMessage) -> MessagingResult<()>;

    /// 暂存收件箱行的 `Processing → Processed`，提交时按状态与版本条件更新
    async fn mark_inbox_processed(&self, claimed: &InboxMessage) -> MessagingResult<()>;

    fn on_completed(&self, action: CompletedAction);

    async fn complete(&self) -> MessagingResult<()>;

    async fn rollback(&self) -> MessagingResult<()>;

    /// 供业务代码向下转型到具体实现以执行业务写入
    fn as_any(&self) -> &dyn Any;
}

/// 工作单元工厂：每次 `begin` 得到独立的事务/连接
#[async_trait]
pub trait UnitOfWorkManager: Send + Sync {
    async fn begin(&self) -> MessagingResult<Arc<dyn UnitOfWork>>;
}

#[async_trait]
impl<T> UnitOfWorkManager for Arc<T>
where
    T: UnitOfWorkManager + ?Sized,
{
    async fn begin(&self) -> MessagingResult<Arc<dyn UnitOfWork>> {
        (**self).begin().await
    }
}
