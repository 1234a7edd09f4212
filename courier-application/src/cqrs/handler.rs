use super::CqrsEvent;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use courier_domain::envelope::ActorContext;
use courier_domain::uow::{UnitOfWork, UnitOfWorkManager};
use std::sync::Arc;
use std::time::Duration;

/// 处理器执行上下文
///
/// 同步执行沿用调用方的工作单元；后台执行拿到的是全新上下文，
/// 没有打开的工作单元，需要时通过 `begin_unit_of_work` 自行开启。
#[derive(Clone)]
pub struct HandlerContext {
    actor: ActorContext,
    unit_of_work: Option<Arc<dyn UnitOfWork>>,
    unit_of_work_manager: Option<Arc<dyn UnitOfWorkManager>>,
    background: bool,
}

impl HandlerContext {
    pub(crate) fn current(
        ctx: &AppContext,
        unit_of_work_manager: Option<Arc<dyn UnitOfWorkManager>>,
    ) -> Self {
        Self {
            actor: ctx.actor.clone(),
            unit_of_work: ctx.unit_of_work.clone(),
            unit_of_work_manager,
            background: false,
        }
    }

    pub(crate) fn background(
        actor: ActorContext,
        unit_of_work_manager: Option<Arc<dyn UnitOfWorkManager>>,
    ) -> Self {
        Self {
            actor,
            unit_of_work: None,
            unit_of_work_manager,
            background: true,
        }
    }

    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    pub fn unit_of_work(&self) -> Option<&Arc<dyn UnitOfWork>> {
        self.unit_of_work.as_ref()
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub async fn begin_unit_of_work(&self) -> AppResult<Arc<dyn UnitOfWork>> {
        let manager = self
            .unit_of_work_manager
            .as_ref()
            .ok_or(AppError::NoUnitOfWork("dispatcher has no unit of work manager"))?;
        Ok(manager.begin().await?)
    }
}

/// CQRS 事件处理器
///
/// 重试相关方法返回 `None` 时使用分发器配置。
#[async_trait]
pub trait CqrsEventHandler<E>: Send + Sync
where
    E: CqrsEvent,
{
    fn handler_name(&self) -> &str;

    fn handle_when(&self, _event: &E) -> bool {
        true
    }

    /// 强制在分发调用方的任务内同步执行
    fn force_current_thread(&self) -> bool {
        false
    }

    fn retry_on_failed_times(&self) -> Option<u32> {
        None
    }

    fn retry_delay(&self) -> Option<Duration> {
        None
    }

    async fn handle(&self, ctx: &HandlerContext, event: &E) -> anyhow::Result<()>;
}

#[async_trait]
impl<E, T> CqrsEventHandler<E> for Arc<T>
where
    E: CqrsEvent,
    T: CqrsEventHandler<E> + ?Sized,
{
    fn handler_name(&self) -> &str {
        (**self).handler_name()
    }

    fn handle_when(&self, event: &E) -> bool {
        (**self).handle_when(event)
    }

    fn force_current_thread(&self) -> bool {
        (**self).force_current_thread()
    }

    fn retry_on_failed_times(&self) -> Option<u32> {
        (**self).retry_on_failed_times()
    }

    fn retry_delay(&self) -> Option<Duration> {
        (**self).retry_delay()
    }

    async fn handle(&self, ctx: &HandlerContext, event: &E) -> anyhow::Result<()> {
        (**self).handle(ctx, event).await
    }
}
