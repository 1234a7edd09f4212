//! 发件箱清扫器（OutboxSweeper）
//!
//! 周期执行，负责把已提交但尚未发布的行推送到总线：
//! - 拉取到期的 `New/Failed` 行（分区 FIFO 由仓储保证）；
//! - 按分区分组：分区之间并发推进，分区内部顺序推进；
//! - 分区内首个失败或认领冲突即终止该分区本轮推进，保证分区内顺序；
//! - 另提供超时回收与死信查询。
//!
use super::publish::{OutboxPublisher, RowOutcome};
use super::{OutboxConfig, OutboxMessage};
use crate::persist::selection::stale_before;
use crate::bus::MessageBusProducer;
use crate::error::MessagingResult as Result;
use crate::persist::OutboxRepository;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// 单轮清扫统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// 成功认领的行数
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    pub lost_claims: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Published => {
                self.claimed += 1;
                self.published += 1;
            }
            RowOutcome::Failed => {
                self.claimed += 1;
                self.failed += 1;
            }
            RowOutcome::LostClaim => self.lost_claims += 1,
        }
    }

    fn merge(mut self, other: SweepReport) -> Self {
        self.claimed += other.claimed;
        self.published += other.published;
        self.failed += other.failed;
        self.lost_claims += other.lost_claims;
        self
    }
}

#[derive(Clone)]
pub struct OutboxSweeper {
    publisher: OutboxPublisher,
}

impl OutboxSweeper {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        bus: Arc<dyn MessageBusProducer>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            publisher: OutboxPublisher::new(repository, bus, config),
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        self.publisher.config()
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_once(Utc::now()).await
    }

    /// 以给定时刻执行一轮清扫
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let config = self.publisher.config();
        let rows = self
            .publisher
            .repository()
            .fetch_sweep_candidates(now, config.batch_size, config.max_retry_count)
            .await?;
        if rows.is_empty() {
            return Ok(SweepReport::default());
        }

        let lanes = partition_lanes(rows);
        let report = stream::iter(lanes)
            .map(|lane| self.drain_lane(lane, now))
            .buffer_unordered(config.partition_concurrency.max(1))
            .fold(SweepReport::default(), |acc, r| async move { acc.merge(r) })
            .await;

        info!(
            claimed = report.claimed,
            published = report.published,
            failed = report.failed,
            lost_claims = report.lost_claims,
            "outbox sweep finished"
        );
        Ok(report)
    }

    async fn drain_lane(&self, lane: Vec<OutboxMessage>, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for row in &lane {
            match self.publisher.claim_and_publish(row, now).await {
                Ok(RowOutcome::Published) => report.record(RowOutcome::Published),
                Ok(outcome) => {
                    report.record(outcome);
                    break;
                }
                Err(e) => {
                    warn!(tracking_id = row.id(), error = %e, "outbox sweep aborted partition");
                    break;
                }
            }
        }
        report
    }

    /// 将超时的处理中行退回 `Failed`，返回回收行数
    pub async fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = stale_before(now, self.config().processing_timeout);
        let n = self.publisher.repository().reclaim_stale(cutoff, now).await?;
        if n > 0 {
            warn!(reclaimed = n, "stale outbox rows returned to failed");
        }
        Ok(n)
    }

    /// 超过重试上限的死信行
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        self.publisher
            .repository()
            .dead_letters(self.config().max_retry_count, limit)
            .await
    }
}

// 无分区的行各自成道；同分区的行保持仓储返回的顺序
fn partition_lanes(rows: Vec<OutboxMessage>) -> Vec<Vec<OutboxMessage>> {
    let mut lanes: Vec<Vec<OutboxMessage>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        match row.sub_queue_prefix().map(str::to_string) {
            Some(p) => match index.get(&p) {
                Some(&i) => lanes[i].push(row),
                None => {
                    index.insert(p, lanes.len());
                    lanes.push(vec![row]);
                }
            },
            None => lanes.push(vec![row]),
        }
    }
    lanes
}
