//! 消息投递子系统统一错误定义
//!
//! 聚焦序列化、消息总线、处理器、仓储与工作单元等最小必要集合，
//! 便于在各实现层统一转换为 `MessagingError`。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MessagingError {
    // --- 序列化/解析 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },

    // --- 消息系统 ---
    #[error("message bus error: {reason}")]
    MessageBus { reason: String },
    #[error("message handler error: handler={handler}, reason={reason}")]
    MessageHandler { handler: String, reason: String },
    #[error("consumer not found: {consumer}")]
    ConsumerNotFound { consumer: String },

    // --- 仓储/持久化 ---
    #[error("repository error: {reason}")]
    Repository { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("unit of work error: {reason}")]
    UnitOfWork { reason: String },

    // --- 状态 ---
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl MessagingError {
    pub fn message_bus(reason: impl Into<String>) -> Self {
        Self::MessageBus {
            reason: reason.into(),
        }
    }

    pub fn repository(reason: impl Into<String>) -> Self {
        Self::Repository {
            reason: reason.into(),
        }
    }

    pub fn unit_of_work(reason: impl Into<String>) -> Self {
        Self::UnitOfWork {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type MessagingResult<T> = Result<T, MessagingError>;

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在基础设施层直接使用 `?` 将 sqlx/uuid/ulid 等错误转换为 MessagingError

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => MessagingError::NotFound {
                reason: "row not found".to_string(),
            },
            other => MessagingError::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<uuid::Error> for MessagingError {
    fn from(err: uuid::Error) -> Self {
        MessagingError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<ulid::DecodeError> for MessagingError {
    fn from(err: ulid::DecodeError) -> Self {
        MessagingError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for MessagingError {
    fn from(err: chrono::ParseError) -> Self {
        MessagingError::Parse {
            reason: err.to_string(),
        }
    }
}
