//! 发件箱/收件箱行状态
//!
use crate::error::MessagingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 行处理状态
///
/// 只允许向前推进，唯一的回退是重试时的 `Failed → Processing`；
/// 超时回收额外允许 `Processing → Failed` 与（收件箱）`New → Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    New,
    Processing,
    Processed,
    Failed,
}

/// 发件箱发送状态
pub type SendStatus = MessageStatus;
/// 收件箱消费状态
pub type ConsumeStatus = MessageStatus;

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Processing => "Processing",
            Self::Processed => "Processed",
            Self::Failed => "Failed",
        }
    }

    /// 可被认领（清扫/重处理）的状态
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::New | Self::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed)
    }

    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (New, Processing)
                | (New, Failed)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(Self::New),
            "Processing" => Ok(Self::Processing),
            "Processed" => Ok(Self::Processed),
            "Failed" => Ok(Self::Failed),
            other => Err(MessagingError::Parse {
                reason: format!("unknown message status: {other}"),
            }),
        }
    }
}
