use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// 进程内 CQRS 事件
///
/// 可手写实现，也可通过 `#[cqrs_event(...)]` 宏生成（宏会追加 `metadata` 字段）。
pub trait CqrsEvent: Serialize + Send + Sync + 'static {
    /// 事件分组（如 `CommandEvent`、`EntityEvent`）
    const EVENT_TYPE: &'static str;

    /// 事件名（稳定名称）
    const EVENT_NAME: &'static str;

    fn event_action(&self) -> Option<&str> {
        None
    }

    fn metadata(&self) -> &CqrsEventMetadata;

    fn metadata_mut(&mut self) -> &mut CqrsEventMetadata;

    /// 调用方是否要求该处理器在分发返回前执行完毕
    fn must_wait_handler_execution_finished_immediately(&self, handler_name: &str) -> bool {
        self.metadata().waits_for(handler_name)
    }

    fn with_wait_handler(mut self, handler_name: impl Into<String>) -> Self
    where
        Self: Sized,
    {
        self.metadata_mut().add_wait_handler(handler_name);
        self
    }
}

/// 事件元数据：审计追踪 ID、创建时间与需同步等待的处理器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CqrsEventMetadata {
    audit_track_id: Uuid,
    created_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    wait_handlers: BTreeSet<String>,
}

impl Default for CqrsEventMetadata {
    fn default() -> Self {
        Self {
            audit_track_id: Uuid::new_v4(),
            created_date: Utc::now(),
            wait_handlers: BTreeSet::new(),
        }
    }
}

impl CqrsEventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_track_id(&self) -> Uuid {
        self.audit_track_id
    }

    pub fn created_date(&self) -> DateTime<Utc> {
        self.created_date
    }

    pub fn wait_handlers(&self) -> &BTreeSet<String> {
        &self.wait_handlers
    }

    pub fn add_wait_handler(&mut self, handler_name: impl Into<String>) {
        self.wait_handlers.insert(handler_name.into());
    }

    pub fn waits_for(&self, handler_name: &str) -> bool {
        self.wait_handlers.contains(handler_name)
    }
}
