use crate::backoff::RetryBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 收件箱配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// 单轮重处理最多拉取的行数
    pub batch_size: usize,
    pub max_retry_count: u32,
    pub retry_interval_seconds: u64,
    /// `New/Processing` 行的超时时长
    pub processing_timeout: Duration,
    /// 同一报文匹配多个消费者时的并发数
    pub consumer_concurrency: usize,
    pub backoff: RetryBackoff,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retry_count: 10,
            retry_interval_seconds: 15,
            processing_timeout: Duration::from_secs(5 * 60),
            consumer_concurrency: 8,
            backoff: RetryBackoff::default(),
        }
    }
}
