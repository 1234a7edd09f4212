use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use courier_domain::bus::{InMemoryMessageBus, MessageBusProducer};
use courier_domain::envelope::{
    ActorContext, BusMessage, BusMessagePayload, Identity, RequestContext, RoutingKey, keys,
};
use courier_domain::error::{MessagingError, MessagingResult};
use courier_domain::outbox::{
    OutboxConfig, OutboxMessage, OutboxProducer, OutboxSendOptions, OutboxSweeper,
};
use courier_domain::persist::{InMemoryMessageStore, InMemoryUnitOfWork, OutboxRepository};
use courier_domain::status::SendStatus;
use courier_domain::uow::UnitOfWorkManager;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
    amount: u64,
}

impl BusMessagePayload for OrderPlaced {
    const MESSAGE_GROUP: &'static str = "EntityEvent";
    const MESSAGE_TYPE: &'static str = "OrderPlaced";

    fn message_action(&self) -> Option<&str> {
        Some("Created")
    }
}

fn order(id: &str) -> OrderPlaced {
    OrderPlaced {
        order_id: id.to_string(),
        amount: 42,
    }
}

/// 对指定路由键始终失败的总线，其余报文记录下来
#[derive(Clone, Default)]
struct FlakyBus {
    failing: Arc<Mutex<HashSet<String>>>,
    published: Arc<Mutex<Vec<String>>>,
}

impl FlakyBus {
    fn fail_on(&self, routing_key: &str) {
        self.failing.lock().unwrap().insert(routing_key.to_string());
    }
    fn published_keys(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBusProducer for FlakyBus {
    async fn publish(&self, routing_key: &str, _payload: &str) -> MessagingResult<()> {
        if self.failing.lock().unwrap().contains(routing_key) {
            return Err(MessagingError::message_bus("connection refused"));
        }
        self.published.lock().unwrap().push(routing_key.to_string());
        Ok(())
    }
}

fn stored_row(
    id: &str,
    routing_key: &str,
    status: SendStatus,
    retry_count: u32,
    created: DateTime<Utc>,
    next_retry: DateTime<Utc>,
    partition: Option<&str>,
) -> OutboxMessage {
    OutboxMessage::builder()
        .id(id.to_string())
        .routing_key(routing_key.to_string())
        .message("{}".to_string())
        .send_status(status)
        .retry_count(retry_count)
        .next_retry_time(next_retry)
        .created_date(created)
        .last_updated_date(created)
        .maybe_sub_queue_prefix(partition.map(str::to_string))
        .build()
}

#[tokio::test(flavor = "multi_thread")]
async fn committed_message_survives_broker_outage_and_is_swept_later() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(InMemoryMessageBus::new(16));
    bus.set_available(false);
    let config = OutboxConfig {
        immediate_send: false,
        ..Default::default()
    };
    let producer = OutboxProducer::new("order-service", store.clone(), bus.clone(), config.clone());

    let identity = Identity::builder().user_id("u-1".to_string()).build();
    let mut actor = ActorContext::new(identity, RequestContext::new());
    actor
        .request_context_mut()
        .insert(&keys::CORRELATION_ID, &"corr-9".to_string())?;

    let uow = store.begin().await?;
    uow.as_any()
        .downcast_ref::<InMemoryUnitOfWork>()
        .unwrap()
        .put_entity("order-1", json!({"state": "placed"}))?;
    let options = OutboxSendOptions::builder().unit_of_work(uow.clone()).build();
    let sent = producer.send(&actor, order("order-1"), options).await?;

    // 提交前既无业务写入也无发件箱行
    assert!(store.outbox_messages()?.is_empty());
    assert!(store.entity("order-1")?.is_none());
    uow.complete().await?;

    let rows = store.outbox_messages()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].send_status(), SendStatus::New);
    assert_eq!(rows[0].id(), sent.tracking_id().as_str());
    assert_eq!(rows[0].source_transaction_id(), Some(uow.id()));
    assert!(store.entity("order-1")?.is_some());
    assert!(bus.published().is_empty());

    // 模拟重启：中间件恢复后由新的清扫器接手
    bus.set_available(true);
    let sweeper = OutboxSweeper::new(store.clone(), bus.clone(), config);
    let report = sweeper.sweep_once(Utc::now()).await?;
    assert_eq!(report.published, 1);

    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].routing_key(),
        "EntityEvent.order-service.OrderPlaced.Created"
    );
    let back = BusMessage::<OrderPlaced>::from_json(published[0].payload())?;
    assert_eq!(back.tracking_id(), sent.tracking_id());
    assert_eq!(back.identity().user_id(), Some("u-1"));
    assert_eq!(
        back.request_context().get(&keys::CORRELATION_ID)?,
        Some("corr-9".to_string())
    );

    let row = OutboxRepository::get(store.as_ref(), sent.tracking_id().as_str())
        .await?
        .unwrap();
    assert_eq!(row.send_status(), SendStatus::Processed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rolled_back_transaction_leaves_nothing_behind() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(InMemoryMessageBus::new(16));
    let producer = OutboxProducer::new("order-service", store.clone(), bus.clone(), OutboxConfig::default());

    let uow = store.begin().await?;
    uow.as_any()
        .downcast_ref::<InMemoryUnitOfWork>()
        .unwrap()
        .put_entity("order-2", json!({"state": "placed"}))?;
    let options = OutboxSendOptions::builder().unit_of_work(uow.clone()).build();
    producer
        .send(&ActorContext::system(), order("order-2"), options)
        .await?;
    uow.rollback().await?;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(store.outbox_messages()?.is_empty());
    assert!(store.entity("order-2")?.is_none());
    assert!(bus.published().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn immediate_send_publishes_after_commit() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(InMemoryMessageBus::new(16));
    let producer = OutboxProducer::new("order-service", store.clone(), bus.clone(), OutboxConfig::default());

    let uow = store.begin().await?;
    let options = OutboxSendOptions::builder()
        .unit_of_work(uow.clone())
        .sub_queue_prefix("order-3")
        .build();
    let sent = producer
        .send(&ActorContext::system(), order("order-3"), options)
        .await?;
    assert!(bus.published().is_empty());
    uow.complete().await?;

    let id = sent.tracking_id().as_str().to_string();
    let processed = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        loop {
            let row = OutboxRepository::get(store.as_ref(), &id).await.unwrap();
            if row.is_some_and(|r| r.send_status() == SendStatus::Processed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(processed.is_ok(), "row should be published right after commit");
    assert_eq!(bus.published().len(), 1);

    let row = OutboxRepository::get(store.as_ref(), &id).await?.unwrap();
    assert_eq!(row.sub_queue_prefix(), Some("order-3"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn send_without_unit_of_work_stores_and_publishes() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(InMemoryMessageBus::new(16));
    let producer = OutboxProducer::new("order-service", store.clone(), bus.clone(), OutboxConfig::default());

    let options = OutboxSendOptions::builder()
        .routing_key(RoutingKey::new("custom.key"))
        .build();
    let sent = producer
        .send(&ActorContext::system(), order("order-4"), options)
        .await?;

    assert_eq!(sent.routing_key().as_str(), "custom.key");
    let row = OutboxRepository::get(store.as_ref(), sent.tracking_id().as_str())
        .await?
        .unwrap();
    assert_eq!(row.send_status(), SendStatus::Processed);
    assert_eq!(row.source_transaction_id(), None);
    assert_eq!(bus.published()[0].routing_key(), "custom.key");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_ceiling_boundary_and_dead_letter() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(InMemoryMessageBus::new(16));
    bus.set_available(false);
    let config = OutboxConfig {
        max_retry_count: 3,
        default_retry_interval_seconds: 15,
        ..Default::default()
    };
    let sweeper = OutboxSweeper::new(store.clone(), bus.clone(), config);
    let now = Utc::now();
    store.put_outbox(stored_row(
        "m-1",
        "k",
        SendStatus::Failed,
        2,
        now - Duration::minutes(5),
        now - Duration::seconds(1),
        None,
    ))?;

    // 第 3 次失败：仍在上限内，按 15 × 2^2 秒后重试
    let report = sweeper.sweep_once(now).await?;
    assert_eq!(report.failed, 1);
    let row = OutboxRepository::get(store.as_ref(), "m-1").await?.unwrap();
    assert_eq!(row.send_status(), SendStatus::Failed);
    assert_eq!(row.retry_count(), 3);
    assert_eq!(row.next_retry_time(), now + Duration::seconds(60));
    assert_eq!(row.last_send_error(), Some("message bus error: broker unreachable"));

    // 未到重试时间不会被认领
    let early = sweeper.sweep_once(now + Duration::seconds(30)).await?;
    assert_eq!(early.claimed, 0);

    // 到期后最后一次尝试，失败即成为死信
    let last = sweeper.sweep_once(now + Duration::seconds(61)).await?;
    assert_eq!(last.failed, 1);
    let dead = sweeper.dead_letters(10).await?;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count(), 4);

    bus.set_available(true);
    let never = sweeper.sweep_once(now + Duration::days(30)).await?;
    assert_eq!(never.claimed, 0);
    assert!(bus.published().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_sweepers_claim_a_row_exactly_once() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(InMemoryMessageBus::new(16));
    let now = Utc::now();
    store.put_outbox(stored_row(
        "m-race",
        "k",
        SendStatus::Failed,
        1,
        now - Duration::minutes(1),
        now - Duration::seconds(1),
        None,
    ))?;

    let a = OutboxSweeper::new(store.clone(), bus.clone(), OutboxConfig::default());
    let b = OutboxSweeper::new(store.clone(), bus.clone(), OutboxConfig::default());
    let (ra, rb) = tokio::join!(a.sweep_once(now), b.sweep_once(now));
    let (ra, rb) = (ra?, rb?);

    assert_eq!(ra.claimed + rb.claimed, 1);
    assert_eq!(bus.published().len(), 1);

    // 同一版本的两次认领只有一次成功
    store.put_outbox(stored_row("m-cas", "k", SendStatus::Failed, 1, now, now, None))?;
    let first = OutboxRepository::try_claim(store.as_ref(), "m-cas", SendStatus::Failed, 0, now).await?;
    let second = OutboxRepository::try_claim(store.as_ref(), "m-cas", SendStatus::Failed, 0, now).await?;
    assert!(first.is_some());
    assert!(second.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn partition_failure_blocks_later_rows_of_that_partition_only() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(FlakyBus::default());
    bus.fail_on("a.first");
    let now = Utc::now();
    let t0 = now - Duration::minutes(3);
    for (i, (id, key, partition)) in [
        ("a1", "a.first", Some("a")),
        ("a2", "a.second", Some("a")),
        ("a3", "a.third", Some("a")),
        ("b1", "b.first", Some("b")),
        ("free", "free", None),
    ]
    .into_iter()
    .enumerate()
    {
        store.put_outbox(stored_row(
            id,
            key,
            SendStatus::New,
            0,
            t0 + Duration::seconds(i as i64),
            now,
            partition,
        ))?;
    }

    let sweeper = OutboxSweeper::new(store.clone(), bus.clone(), OutboxConfig::default());
    let report = sweeper.sweep_once(now).await?;
    assert_eq!(report.failed, 1);
    assert_eq!(report.published, 2);
    let mut keys = bus.published_keys();
    keys.sort();
    assert_eq!(keys, vec!["b.first".to_string(), "free".to_string()]);

    // a1 等待重试期间，a2/a3 不会越过它
    let again = sweeper.sweep_once(now + Duration::seconds(1)).await?;
    assert_eq!(again.claimed, 0);

    // a1 恢复后分区按创建顺序依次发布
    bus.failing.lock().unwrap().clear();
    let later = sweeper.sweep_once(now + Duration::hours(2)).await?;
    assert_eq!(later.published, 3);
    assert_eq!(
        bus.published_keys()[2..],
        ["a.first".to_string(), "a.second".to_string(), "a.third".to_string()]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn immediate_send_waits_behind_pending_rows_of_its_partition() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(FlakyBus::default());
    let now = Utc::now();
    store.put_outbox(stored_row(
        "a1",
        "a.first",
        SendStatus::Failed,
        1,
        now - Duration::minutes(1),
        now + Duration::seconds(60),
        Some("a"),
    ))?;
    let producer = OutboxProducer::new("order-service", store.clone(), bus.clone(), OutboxConfig::default());

    let options = OutboxSendOptions::builder()
        .routing_key(RoutingKey::new("a.second"))
        .sub_queue_prefix("a")
        .build();
    let sent = producer
        .send(&ActorContext::system(), order("order-a"), options)
        .await?;

    // a1 还在等待重试，新行不能越过它
    assert!(bus.published_keys().is_empty());
    let row = OutboxRepository::get(store.as_ref(), sent.tracking_id().as_str())
        .await?
        .unwrap();
    assert_eq!(row.send_status(), SendStatus::New);

    // 其他分区不受影响
    let other = OutboxSendOptions::builder()
        .routing_key(RoutingKey::new("b.first"))
        .sub_queue_prefix("b")
        .build();
    producer
        .send(&ActorContext::system(), order("order-b"), other)
        .await?;
    assert_eq!(bus.published_keys(), vec!["b.first".to_string()]);

    let sweeper = OutboxSweeper::new(store.clone(), bus.clone(), OutboxConfig::default());
    let report = sweeper.sweep_once(Utc::now() + Duration::minutes(2)).await?;
    assert_eq!(report.published, 2);
    assert_eq!(
        bus.published_keys()[1..],
        ["a.first".to_string(), "a.second".to_string()]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_processing_rows_are_reclaimed_then_swept() -> AnyResult<()> {
    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(InMemoryMessageBus::new(16));
    let now = Utc::now();
    let abandoned = now - Duration::minutes(10);
    store.put_outbox(stored_row(
        "m-stale",
        "k",
        SendStatus::Processing,
        0,
        abandoned,
        abandoned,
        None,
    ))?;
    store.put_outbox(stored_row(
        "m-busy",
        "k",
        SendStatus::Processing,
        0,
        now,
        now,
        None,
    ))?;

    let sweeper = OutboxSweeper::new(store.clone(), bus.clone(), OutboxConfig::default());
    assert_eq!(sweeper.sweep_once(now).await?.claimed, 0);

    assert_eq!(sweeper.reclaim_stale(now).await?, 1);
    let row = OutboxRepository::get(store.as_ref(), "m-stale").await?.unwrap();
    assert_eq!(row.send_status(), SendStatus::Failed);
    assert_eq!(row.retry_count(), 1);
    assert_eq!(row.last_send_error(), Some("processing timed out"));

    let report = sweeper.sweep_once(now).await?;
    assert_eq!(report.published, 1);
    let busy = OutboxRepository::get(store.as_ref(), "m-busy").await?.unwrap();
    assert_eq!(busy.send_status(), SendStatus::Processing);
    Ok(())
}
