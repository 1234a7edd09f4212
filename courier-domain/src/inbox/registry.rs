//! 消费者注册表（ConsumerRegistry）
//!
//! 将类型化消费者按路由键模式与消费者名登记，运行时以类型擦除方式调度：
//! - `deliver`：总线报文按路由键匹配所有消费者，各自反序列化后走收件箱流程；
//! - `process_claimed`：重处理器按行上的 `consumer_by` 找回消费者重新执行。
//!
//! 路由键模式：`*` 匹配一个段，`#` 匹配零个或多个段。
//!
use super::consumer::{BusMessageConsumer, ConsumeOutcome, InboxConsumer};
use super::InboxMessage;
use crate::envelope::{BusMessage, RoutingKey};
use crate::error::{MessagingError, MessagingResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt, stream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{error, warn};

/// 一批消费结果的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeReport {
    pub processed: usize,
    pub duplicates: usize,
    pub claimed_elsewhere: usize,
    pub failed: usize,
    /// 仓储等基础设施错误，行状态未推进
    pub errors: usize,
}

impl ConsumeReport {
    pub(crate) fn record(&mut self, result: &Result<ConsumeOutcome>) {
        match result {
            Ok(ConsumeOutcome::Processed) => self.processed += 1,
            Ok(ConsumeOutcome::Duplicate) => self.duplicates += 1,
            Ok(ConsumeOutcome::ClaimedElsewhere) => self.claimed_elsewhere += 1,
            Ok(ConsumeOutcome::Failed) => self.failed += 1,
            Err(_) => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.processed + self.duplicates + self.claimed_elsewhere + self.failed + self.errors
    }
}

#[async_trait]
trait ErasedConsumer: Send + Sync {
    async fn deliver(
        &self,
        inbox: &InboxConsumer,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>;

    async fn process_claimed(
        &self,
        inbox: &InboxConsumer,
        claimed: InboxMessage,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>;
}

struct TypedConsumer<P, C> {
    consumer: C,
    _payload: PhantomData<fn() -> P>,
}

#[async_trait]
impl<P, C> ErasedConsumer for TypedConsumer<P, C>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
    C: BusMessageConsumer<P> + 'static,
{
    async fn deliver(
        &self,
        inbox: &InboxConsumer,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let message = BusMessage::<P>::from_json(raw)?;
        inbox.consume_raw(&self.consumer, &message, raw, now).await
    }

    async fn process_claimed(
        &self,
        inbox: &InboxConsumer,
        claimed: InboxMessage,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        match BusMessage::<P>::from_json(claimed.message()) {
            Ok(message) => {
                inbox
                    .process_claimed(&self.consumer, &message, claimed, now)
                    .await
            }
            // 报文无法还原：记为失败，最终沉为死信
            Err(e) => inbox.fail(&claimed, &e.to_string(), now).await,
        }
    }
}

struct Registration {
    name: String,
    pattern: String,
    consumer: Arc<dyn ErasedConsumer>,
}

pub struct ConsumerRegistry {
    inbox: Arc<InboxConsumer>,
    registrations: Vec<Registration>,
    by_name: HashMap<String, usize>,
}

impl ConsumerRegistry {
    pub fn new(inbox: Arc<InboxConsumer>) -> Self {
        Self {
            inbox,
            registrations: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn inbox(&self) -> &Arc<InboxConsumer> {
        &self.inbox
    }

    /// 登记消费者；消费者名必须唯一
    pub fn register<P, C>(&mut self, pattern: impl Into<String>, consumer: C) -> Result<&mut Self>
    where
        P: Serialize + DeserializeOwned + Send + Sync + 'static,
        C: BusMessageConsumer<P> + 'static,
    {
        let name = consumer.consumer_name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(MessagingError::InvalidState {
                reason: format!("consumer already registered: {name}"),
            });
        }
        self.by_name.insert(name.clone(), self.registrations.len());
        self.registrations.push(Registration {
            name,
            pattern: pattern.into(),
            consumer: Arc::new(TypedConsumer {
                consumer,
                _payload: PhantomData,
            }),
        });
        Ok(self)
    }

    pub fn consumer_names(&self) -> impl Iterator<Item = &str> {
        self.registrations.iter().map(|r| r.name.as_str())
    }

    /// 将一条总线报文交付给所有路由键匹配的消费者
    pub async fn deliver(&self, routing_key: &str, raw: &str) -> ConsumeReport {
        let key = RoutingKey::new(routing_key);
        let matched: Vec<&Registration> = self
            .registrations
            .iter()
            .filter(|r| key.matches(&r.pattern))
            .collect();
        if matched.is_empty() {
            warn!(routing_key, "no consumer matches routing key");
            return ConsumeReport::default();
        }

        let now = Utc::now();
        let concurrency = self.inbox.config().consumer_concurrency.max(1);
        // 先装箱成具名的 Send future，再交给 buffer_unordered
        let deliveries: Vec<BoxFuture<'_, (&str, Result<ConsumeOutcome>)>> = matched
            .into_iter()
            .map(|r| {
                let name = r.name.as_str();
                let delivery = r.consumer.deliver(&self.inbox, raw, now);
                async move { (name, delivery.await) }.boxed()
            })
            .collect();

        let mut pending = stream::iter(deliveries).buffer_unordered(concurrency);
        let mut report = ConsumeReport::default();
        while let Some((name, result)) = pending.next().await {
            if let Err(e) = &result {
                error!(consumer = name, routing_key, error = %e, "inbox delivery failed");
            }
            report.record(&result);
        }
        report
    }

    /// 按 `consumer_by` 重新执行一条已认领的收件箱行
    pub async fn process_claimed(
        &self,
        claimed: InboxMessage,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let Some(&idx) = self.by_name.get(claimed.consumer_by()) else {
            return Err(MessagingError::ConsumerNotFound {
                consumer: claimed.consumer_by().to_string(),
            });
        };
        self.registrations[idx]
            .consumer
            .process_claimed(&self.inbox, claimed, now)
            .await
    }
}
