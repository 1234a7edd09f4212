//! 内存版发件箱/收件箱示例
//!
//! 运行：`RUST_LOG=courier_domain=debug cargo run -p courier-domain --example outbox_inmemory`
//!
use anyhow::Result;
use async_trait::async_trait;
use courier_domain::bus::InMemoryMessageBus;
use courier_domain::engine::{MessagingEngine, MessagingEngineConfig};
use courier_domain::envelope::{ActorContext, BusMessage, Identity, RequestContext};
use courier_domain::inbox::{
    BusMessageConsumer, ConsumeContext, ConsumerRegistry, InboxConfig, InboxConsumer,
};
use courier_domain::outbox::{OutboxConfig, OutboxProducer, OutboxSendOptions, OutboxSweeper};
use courier_domain::persist::{InMemoryMessageStore, InMemoryUnitOfWork};
use courier_domain::uow::UnitOfWorkManager;
use courier_macros::bus_message;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[bus_message(group = "EntityEvent", action = "Created")]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountOpened {
    account_id: String,
    owner: String,
}

struct WelcomeMailer;

#[async_trait]
impl BusMessageConsumer<AccountOpened> for WelcomeMailer {
    fn consumer_name(&self) -> &str {
        "WelcomeMailer"
    }

    async fn handle(&self, ctx: &ConsumeContext, msg: &BusMessage<AccountOpened>) -> Result<()> {
        if let Some(uow) = ctx.unit_of_work().as_any().downcast_ref::<InMemoryUnitOfWork>() {
            uow.put_entity(
                format!("mail:{}", msg.payload().account_id),
                json!({ "to": msg.payload().owner, "requested_by": ctx.actor().identity().user_id() }),
            )?;
        }
        tracing::info!(account = %msg.payload().account_id, "welcome mail queued");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store = Arc::new(InMemoryMessageStore::new());
    let bus = Arc::new(InMemoryMessageBus::new(64));

    let inbox = Arc::new(InboxConsumer::new(store.clone(), store.clone(), InboxConfig::default()));
    let mut registry = ConsumerRegistry::new(inbox);
    registry.register::<AccountOpened, _>("EntityEvent.#", WelcomeMailer)?;

    let engine = Arc::new(
        MessagingEngine::builder()
            .sweeper(OutboxSweeper::new(store.clone(), bus.clone(), OutboxConfig::default()))
            .registry(Arc::new(registry))
            .bus_consumer(bus.clone())
            .config(MessagingEngineConfig {
                sweep_interval: Duration::from_millis(200),
                ..Default::default()
            })
            .build(),
    );
    let handle = engine.start().await;

    let producer = OutboxProducer::new("account-service", store.clone(), bus.clone(), OutboxConfig::default());
    let actor = ActorContext::new(
        Identity::builder().user_id("admin".to_string()).build(),
        RequestContext::new(),
    );

    let uow = store.begin().await?;
    if let Some(mem) = uow.as_any().downcast_ref::<InMemoryUnitOfWork>() {
        mem.put_entity("account:42", json!({ "owner": "alice@example.com" }))?;
    }
    let opened = AccountOpened {
        account_id: "42".into(),
        owner: "alice@example.com".into(),
    };
    let options = OutboxSendOptions::builder().unit_of_work(uow.clone()).build();
    let sent = producer.send(&actor, opened, options).await?;
    uow.complete().await?;
    tracing::info!(tracking_id = %sent.tracking_id(), routing_key = %sent.routing_key(), "account opened");

    tokio::time::sleep(Duration::from_millis(500)).await;
    tracing::info!(mail = ?store.entity("mail:42")?, "side effect");

    handle.shutdown();
    handle.join().await;
    Ok(())
}
