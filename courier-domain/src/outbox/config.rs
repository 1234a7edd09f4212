use crate::backoff::RetryBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 发件箱配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// 单轮清扫最多拉取的行数
    pub batch_size: usize,
    /// 重试上限：`retry_count` 超过该值的失败行不再被清扫
    pub max_retry_count: u32,
    /// 行未指定重试间隔时使用
    pub default_retry_interval_seconds: u64,
    /// 处理中行的超时时长，超时后由回收任务退回 `Failed`
    pub processing_timeout: Duration,
    /// 提交后立即尝试发布，而不是等待下一轮清扫
    pub immediate_send: bool,
    /// 清扫时同时推进的分区数
    pub partition_concurrency: usize,
    pub backoff: RetryBackoff,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retry_count: 10,
            default_retry_interval_seconds: 15,
            processing_timeout: Duration::from_secs(5 * 60),
            immediate_send: true,
            partition_concurrency: 8,
            backoff: RetryBackoff::default(),
        }
    }
}
