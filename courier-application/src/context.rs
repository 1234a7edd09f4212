use courier_domain::envelope::ActorContext;
use courier_domain::uow::UnitOfWork;
use std::sync::Arc;

/// 应用层上下文（Application Context）
///
/// 承载一次应用层调用所需的横切信息：
/// - 操作者（`ActorContext`）：身份与请求上下文，随信封传播到下游；
/// - 工作单元（可选）：调用方已开启的事务，同步处理器与发件箱写入共用它；
/// - 幂等键（可选）：供 API 层做重复提交保护。
///
/// 典型用法：
/// ```rust
/// use courier_application::context::AppContext;
/// use courier_domain::envelope::{ActorContext, Identity, RequestContext};
///
/// let ctx = AppContext {
///     actor: ActorContext::new(
///         Identity::builder().user_id("u-1".to_string()).build(),
///         RequestContext::new(),
///     ),
///     unit_of_work: None,
///     idempotency_key: Some("idem-xyz".into()),
/// };
/// assert!(ctx.unit_of_work.is_none());
/// ```
#[derive(Clone, Default)]
pub struct AppContext {
    pub actor: ActorContext,
    pub unit_of_work: Option<Arc<dyn UnitOfWork>>,
    pub idempotency_key: Option<String>,
}

impl AppContext {
    pub fn new(actor: ActorContext) -> Self {
        Self {
            actor,
            ..Default::default()
        }
    }

    pub fn with_unit_of_work(mut self, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        self.unit_of_work = Some(unit_of_work);
        self
    }
}
