//! CQRS 事件分发器（CqrsEventDispatcher）
//!
//! 按事件类型登记处理器工厂，分发时逐个处理器决定执行方式：
//! - `handle_when` 为假即跳过；
//! - 事件要求等待、处理器强制当前线程或配置 `force_sync` 时同步执行，沿用调用方上下文；
//! - 其余进入后台：先取得并发许可再派生任务，许可耗尽时分发调用方等待；
//! - 每次执行有独立的处理器实例与上下文，执行结束即释放；
//! - 失败（含处理器 panic）按固定间隔重试，最终失败仅记录日志，不向调用方传播。
//!
use super::handler::{CqrsEventHandler, HandlerContext};
use super::CqrsEvent;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use courier_domain::uow::UnitOfWorkManager;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, field, info_span, warn};

type HandlerFactory<E> = Arc<dyn Fn() -> Arc<dyn CqrsEventHandler<E>> + Send + Sync>;

struct Registrations<E: CqrsEvent> {
    names: HashSet<String>,
    factories: Vec<HandlerFactory<E>>,
}

impl<E: CqrsEvent> Default for Registrations<E> {
    fn default() -> Self {
        Self {
            names: HashSet::new(),
            factories: Vec::new(),
        }
    }
}

/// 分发器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 处理器未指定时的额外重试次数
    pub retry_on_failed_times: u32,
    pub retry_delay: Duration,
    /// 后台执行的并发上限
    pub max_concurrent_background: usize,
    /// 全部处理器同步执行（测试或单线程场景）
    pub force_sync: bool,
    /// 在执行 span 中记录序列化后的事件
    pub trace_event_payload: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_on_failed_times: 3,
            retry_delay: Duration::from_secs(1),
            max_concurrent_background: 64,
            force_sync: false,
            trace_event_payload: true,
        }
    }
}

/// 单次处理器执行的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerExecutionState {
    Dispatched,
    BackgroundQueued,
    SyncExecuting,
    /// 第 n 次重试
    Retrying(u32),
    Succeeded,
    /// 重试耗尽，已记录日志
    LoggedFailure,
}

impl HandlerExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::LoggedFailure)
    }
}

/// 单次分发统计；后台执行只计入 `queued`，其结果见日志
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub skipped: usize,
    pub queued: usize,
    /// 分发器已关闭，未能进入后台
    pub rejected: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 同步执行的处理器及其终态
    pub sync_outcomes: Vec<(String, HandlerExecutionState)>,
}

impl DispatchReport {
    fn record_sync(&mut self, handler: String, state: HandlerExecutionState) {
        match state {
            HandlerExecutionState::Succeeded => self.succeeded += 1,
            _ => self.failed += 1,
        }
        self.sync_outcomes.push((handler, state));
    }
}

#[derive(Clone, Copy)]
struct RetryPolicy {
    retries: u32,
    delay: Duration,
}

pub struct CqrsEventDispatcher {
    registry: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    unit_of_work_manager: Option<Arc<dyn UnitOfWorkManager>>,
    config: DispatcherConfig,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl Default for CqrsEventDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl CqrsEventDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            registry: DashMap::new(),
            unit_of_work_manager: None,
            permits: Arc::new(Semaphore::new(config.max_concurrent_background.max(1))),
            config,
            tracker: TaskTracker::new(),
        }
    }

    /// 后台处理器通过它开启自己的工作单元
    pub fn with_unit_of_work_manager(mut self, manager: Arc<dyn UnitOfWorkManager>) -> Self {
        self.unit_of_work_manager = Some(manager);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 登记处理器工厂；每次执行都会通过工厂得到新的处理器实例
    pub fn register<E, H, F>(&self, factory: F) -> AppResult<()>
    where
        E: CqrsEvent,
        H: CqrsEventHandler<E> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let name = factory().handler_name().to_string();
        let mut entry = self
            .registry
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Registrations::<E>::default()));
        // 键与值同为泛型 E，正常情况下 downcast 不会失败
        let Some(regs) = entry.value_mut().downcast_mut::<Registrations<E>>() else {
            return Err(AppError::Infra(format!(
                "registry type mismatch for event {}",
                E::EVENT_NAME
            )));
        };
        if !regs.names.insert(name.clone()) {
            return Err(AppError::AlreadyRegisteredHandler {
                event: E::EVENT_NAME,
                handler: name,
            });
        }
        regs.factories.push(Arc::new(move || {
            let handler: Arc<dyn CqrsEventHandler<E>> = Arc::new(factory());
            handler
        }));
        Ok(())
    }

    /// 登记一个共享实例（所有执行复用同一对象）
    pub fn register_shared<E, H>(&self, handler: Arc<H>) -> AppResult<()>
    where
        E: CqrsEvent,
        H: CqrsEventHandler<E> + 'static,
    {
        self.register::<E, _, _>(move || handler.clone())
    }

    fn factories<E: CqrsEvent>(&self) -> Vec<HandlerFactory<E>> {
        self.registry
            .get(&TypeId::of::<E>())
            .and_then(|entry| {
                entry
                    .value()
                    .downcast_ref::<Registrations<E>>()
                    .map(|r| r.factories.clone())
            })
            .unwrap_or_default()
    }

    pub async fn dispatch<E: CqrsEvent>(&self, ctx: &AppContext, event: E) -> DispatchReport {
        let event = Arc::new(event);
        let payload: Option<Arc<str>> = if self.config.trace_event_payload {
            serde_json::to_string(event.as_ref()).ok().map(Arc::from)
        } else {
            None
        };

        let mut report = DispatchReport::default();
        let mut sync_handlers = Vec::new();

        for factory in self.factories::<E>() {
            let handler = factory();
            let name = handler.handler_name().to_string();
            report.matched += 1;

            if !handler.handle_when(&event) {
                debug!(handler = %name, event_name = E::EVENT_NAME, "handler skipped by condition");
                report.skipped += 1;
                continue;
            }

            let policy = self.policy_for(handler.as_ref());
            let sync = self.config.force_sync
                || handler.force_current_thread()
                || event.must_wait_handler_execution_finished_immediately(&name);
            if sync {
                sync_handlers.push((handler, name, policy));
                continue;
            }

            // 先取许可再派生：许可耗尽时由分发方承受背压
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                warn!(handler = %name, event_name = E::EVENT_NAME, "dispatcher closed, handler rejected");
                report.rejected += 1;
                continue;
            };
            debug!(handler = %name, state = ?HandlerExecutionState::BackgroundQueued, "handler queued");
            let hctx = HandlerContext::background(ctx.actor.clone(), self.unit_of_work_manager.clone());
            let event = event.clone();
            let payload = payload.clone();
            self.tracker.spawn(async move {
                let _permit = permit;
                execute(handler, name, hctx, event, policy, payload).await;
            });
            report.queued += 1;
        }

        for (handler, name, policy) in sync_handlers {
            debug!(handler = %name, state = ?HandlerExecutionState::SyncExecuting, "handler executing");
            let hctx = HandlerContext::current(ctx, self.unit_of_work_manager.clone());
            let state = execute(handler, name.clone(), hctx, event.clone(), policy, payload.clone()).await;
            report.record_sync(name, state);
        }

        report
    }

    fn policy_for<E: CqrsEvent>(&self, handler: &dyn CqrsEventHandler<E>) -> RetryPolicy {
        RetryPolicy {
            retries: handler
                .retry_on_failed_times()
                .unwrap_or(self.config.retry_on_failed_times),
            delay: handler.retry_delay().unwrap_or(self.config.retry_delay),
        }
    }

    /// 等待当前所有后台执行结束
    pub async fn wait_background_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// 拒绝新的后台执行并等待已派生的执行结束
    pub async fn shutdown(&self) {
        self.permits.close();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

// 处理器实例与上下文由本函数持有，返回即释放
async fn execute<E: CqrsEvent>(
    handler: Arc<dyn CqrsEventHandler<E>>,
    name: String,
    ctx: HandlerContext,
    event: Arc<E>,
    policy: RetryPolicy,
    payload: Option<Arc<str>>,
) -> HandlerExecutionState {
    let span = info_span!(
        "cqrs_event_handler",
        handler = %name,
        event_type = E::EVENT_TYPE,
        event_name = E::EVENT_NAME,
        audit_track_id = %event.metadata().audit_track_id(),
        background = ctx.is_background(),
        event = field::Empty,
    );
    if let Some(p) = payload.as_deref() {
        span.record("event", p);
    }

    async move {
        let mut attempt: u32 = 0;
        loop {
            let attempted = AssertUnwindSafe(handler.handle(&ctx, &event))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panicked(&*panic)));
            match attempted {
                Ok(()) => {
                    debug!(attempt, "handler succeeded");
                    return HandlerExecutionState::Succeeded;
                }
                Err(e) if attempt < policy.retries => {
                    attempt += 1;
                    warn!(
                        state = ?HandlerExecutionState::Retrying(attempt),
                        error = %format!("{e:#}"),
                        "handler failed, retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => {
                    error!(
                        handler = %name,
                        event_type = E::EVENT_TYPE,
                        event = payload.as_deref().unwrap_or(""),
                        retries = attempt,
                        error = %format!("{e:#}"),
                        "handler failed after all retries"
                    );
                    return HandlerExecutionState::LoggedFailure;
                }
            }
        }
    }
    .instrument(span)
    .await
}

// panic 视同一次失败的尝试
fn panicked(panic: &(dyn Any + Send)) -> anyhow::Error {
    let msg = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    anyhow::anyhow!("handler panicked: {msg}")
}
