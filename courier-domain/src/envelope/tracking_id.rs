use crate::error::MessagingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// 消息追踪 ID
///
/// 默认以 ULID 生成，字典序即时间序；在重试与重投过程中保持不变，是收件箱去重的依据。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(String);

impl TrackingId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 若为 ULID 格式则返回其时间戳（毫秒）
    pub fn timestamp_ms(&self) -> Option<u64> {
        Ulid::from_string(&self.0).ok().map(|u| u.timestamp_ms())
    }
}

impl Default for TrackingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 外部生产者可能使用非 ULID 的 ID，只拒绝空串
impl FromStr for TrackingId {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(MessagingError::Parse {
                reason: "tracking id must not be empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl AsRef<str> for TrackingId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
