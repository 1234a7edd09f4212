//! 重试退避策略
//!
//! 失败行的下次重试时间为 `now + retry_interval_seconds × factor(retry_count)`：
//! - `Fixed`：factor 恒为 1；
//! - `Exponential`：factor = 2^(retry_count − 1)，结果封顶于 `max_delay_seconds`。
//!
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryBackoff {
    Fixed,
    Exponential { max_delay_seconds: u64 },
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::Exponential {
            max_delay_seconds: 3600,
        }
    }
}

impl RetryBackoff {
    // 2^20 倍已远超任何合理封顶值，避免移位溢出
    const MAX_EXPONENT: u32 = 20;
    // 十年，保证时间加法不越界
    const HARD_CAP_SECONDS: u64 = 315_360_000;

    /// `retry_count` 为本次失败计入后的重试次数
    pub fn delay_seconds(&self, retry_interval_seconds: u64, retry_count: u32) -> u64 {
        match self {
            Self::Fixed => retry_interval_seconds,
            Self::Exponential { max_delay_seconds } => {
                let exp = retry_count.saturating_sub(1).min(Self::MAX_EXPONENT);
                retry_interval_seconds
                    .saturating_mul(1_u64 << exp)
                    .min(*max_delay_seconds)
            }
        }
    }

    pub fn next_retry_time(
        &self,
        now: DateTime<Utc>,
        retry_interval_seconds: u64,
        retry_count: u32,
    ) -> DateTime<Utc> {
        let secs = self
            .delay_seconds(retry_interval_seconds, retry_count)
            .min(Self::HARD_CAP_SECONDS);
        now + Duration::seconds(secs as i64)
    }
}
