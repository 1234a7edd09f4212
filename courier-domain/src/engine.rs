//! 消息引擎（MessagingEngine）
//!
//! 统一编排发件箱与收件箱的长驻任务：
//! - 周期清扫发件箱，并回收超时的处理中行；
//! - 周期重处理收件箱失败行，并回收超时行；
//! - 订阅总线报文流，按注册表分发到消费者；
//! - 提供关闭与等待的 `EngineHandle`。
//!
use crate::bus::{MessageBusConsumer, RawBusDelivery};
use crate::error::MessagingResult;
use crate::inbox::{ConsumerRegistry, InboxReprocessor};
use crate::outbox::OutboxSweeper;
use bon::Builder;
use chrono::Utc;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 只配置发件箱即为纯生产端；配置注册表与总线消费者后才会启动订阅与重处理
#[derive(Builder)]
pub struct MessagingEngine {
    sweeper: Option<OutboxSweeper>,
    registry: Option<Arc<ConsumerRegistry>>,
    bus_consumer: Option<Arc<dyn MessageBusConsumer>>,
    #[builder(default)]
    config: MessagingEngineConfig,
}

impl MessagingEngine {
    /// 启动引擎；返回前已完成总线订阅，之后发布的报文不会丢失
    pub async fn start(self: Arc<Self>) -> EngineHandle {
        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(5);

        if let Some(sweeper) = self.sweeper.clone() {
            // sweep worker
            {
                let sweeper = sweeper.clone();
                tasks.push(Self::spawn_periodic(
                    token.clone(),
                    self.config.sweep_interval,
                    move || {
                        let sweeper = sweeper.clone();
                        async move {
                            if let Err(e) = sweeper.sweep().await {
                                error!(error = %e, "outbox sweep failed");
                            }
                        }
                    },
                ));
            }

            // outbox reclaim worker
            tasks.push(Self::spawn_periodic(
                token.clone(),
                self.config.reclaim_interval,
                move || {
                    let sweeper = sweeper.clone();
                    async move {
                        if let Err(e) = sweeper.reclaim_stale(Utc::now()).await {
                            error!(error = %e, "outbox reclaim failed");
                        }
                    }
                },
            ));
        }

        if let Some(registry) = self.registry.clone() {
            let reprocessor = InboxReprocessor::new(registry.clone());

            {
                let reprocessor = reprocessor.clone();
                tasks.push(Self::spawn_periodic(
                    token.clone(),
                    self.config.reprocess_interval,
                    move || {
                        let reprocessor = reprocessor.clone();
                        async move {
                            if let Err(e) = reprocessor.process_once(Utc::now()).await {
                                error!(error = %e, "inbox reprocess failed");
                            }
                        }
                    },
                ));
            }

            tasks.push(Self::spawn_periodic(
                token.clone(),
                self.config.reclaim_interval,
                move || {
                    let reprocessor = reprocessor.clone();
                    async move {
                        if let Err(e) = reprocessor.reclaim_stale(Utc::now()).await {
                            error!(error = %e, "inbox reclaim failed");
                        }
                    }
                },
            ));

            if let Some(bus) = self.bus_consumer.clone() {
                let stream = bus.subscribe().await;
                tasks.push(tokio::spawn(Self::subscribe_loop(
                    registry,
                    stream,
                    token.clone(),
                )));
            }
        }

        EngineHandle { token, tasks }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    async fn subscribe_loop(
        registry: Arc<ConsumerRegistry>,
        mut stream: BoxStream<'static, MessagingResult<RawBusDelivery>>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        let report = registry
                            .deliver(delivery.routing_key(), delivery.payload())
                            .await;
                        debug!(
                            routing_key = delivery.routing_key(),
                            processed = report.processed,
                            duplicates = report.duplicates,
                            failed = report.failed,
                            "bus delivery consumed"
                        );
                    }
                    // 落后或瞬时错误：跳过该报文，由发送端重投兜底
                    Some(Err(e)) => warn!(error = %e, "bus subscription error"),
                    None => break,
                },
            }
        }
    }
}

/// 引擎配置
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingEngineConfig {
    /// 发件箱清扫间隔
    pub sweep_interval: Duration,
    /// 超时回收间隔（发件箱与收件箱共用）
    pub reclaim_interval: Duration,
    /// 收件箱失败行重处理间隔
    pub reprocess_interval: Duration,
}

impl Default for MessagingEngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            reclaim_interval: Duration::from_secs(60),
            reprocess_interval: Duration::from_secs(15),
        }
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
