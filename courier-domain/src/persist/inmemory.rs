//! 内存版消息存储（InMemoryMessageStore）
//!
//! 以单把互斥锁保护的表集合模拟一个数据库：发件箱、收件箱与一张极简的业务实体表。
//! - 条件更新在锁内比较状态与版本，语义与 SQL 的 `WHERE status = ? AND version = ?` 相同；
//! - 工作单元在提交时一次性应用暂存的业务写入、发件箱插入与收件箱完成标记，任何一项冲突则整体放弃；
//! - 典型用途：测试环境、示例与本地开发。
//!
use super::selection::{has_pending_predecessor, is_dead_letter, select_candidates};
use super::{InboxRepository, InsertOutcome, OutboxRepository};
use crate::error::{MessagingError, MessagingResult as Result};
use crate::inbox::InboxMessage;
use crate::outbox::OutboxMessage;
use crate::status::MessageStatus;
use crate::uow::{CompletedAction, UnitOfWork, UnitOfWorkManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;
use ulid::Ulid;

const STALE_ERROR: &str = "processing timed out";

#[derive(Default)]
struct Tables {
    outbox: BTreeMap<String, OutboxMessage>,
    inbox: BTreeMap<String, InboxMessage>,
    entities: BTreeMap<String, Value>,
}

/// 内存消息存储，克隆后共享同一组表
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| MessagingError::repository("in-memory store lock poisoned"))
    }

    /// 读取业务实体
    pub fn entity(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.tables()?.entities.get(key).cloned())
    }

    /// 全部发件箱行（按 ID 排序）
    pub fn outbox_messages(&self) -> Result<Vec<OutboxMessage>> {
        Ok(self.tables()?.outbox.values().cloned().collect())
    }

    pub fn inbox_messages(&self) -> Result<Vec<InboxMessage>> {
        Ok(self.tables()?.inbox.values().cloned().collect())
    }

    /// 直接覆盖一行，便于构造测试场景
    pub fn put_outbox(&self, message: OutboxMessage) -> Result<()> {
        self.tables()?
            .outbox
            .insert(message.id().to_string(), message);
        Ok(())
    }

    pub fn put_inbox(&self, message: InboxMessage) -> Result<()> {
        self.tables()?.inbox.insert(message.id().to_string(), message);
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryMessageStore {
    async fn insert(&self, message: OutboxMessage) -> Result<()> {
        let mut t = self.tables()?;
        if t.outbox.contains_key(message.id()) {
            return Err(MessagingError::repository(format!(
                "duplicate outbox message id: {}",
                message.id()
            )));
        }
        t.outbox.insert(message.id().to_string(), message);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxMessage>> {
        Ok(self.tables()?.outbox.get(id).cloned())
    }

    async fn fetch_sweep_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_retry_count: u32,
    ) -> Result<Vec<OutboxMessage>> {
        let t = self.tables()?;
        Ok(
            select_candidates(t.outbox.values(), now, batch_size, max_retry_count)
                .into_iter()
                .cloned()
                .collect(),
        )
    }

    async fn has_pending_predecessor(
        &self,
        message: &OutboxMessage,
        max_retry_count: u32,
    ) -> Result<bool> {
        let t = self.tables()?;
        Ok(has_pending_predecessor(t.outbox.values(), message, max_retry_count))
    }

    async fn try_claim(
        &self,
        id: &str,
        expected_status: MessageStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxMessage>> {
        let mut t = self.tables()?;
        let Some(row) = t.outbox.get_mut(id) else {
            return Ok(None);
        };
        if !expected_status.is_claimable()
            || row.send_status() != expected_status
            || row.version() != expected_version
        {
            return Ok(None);
        }
        row.set_status(MessageStatus::Processing, now);
        Ok(Some(row.clone()))
    }

    async fn mark_processed(&self, claimed: &OutboxMessage, now: DateTime<Utc>) -> Result<bool> {
        let mut t = self.tables()?;
        match t.outbox.get_mut(claimed.id()) {
            Some(row) if owns_claim(row.send_status(), row.version(), claimed.version()) => {
                row.set_status(MessageStatus::Processed, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        claimed: &OutboxMessage,
        error: &str,
        next_retry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.tables()?;
        match t.outbox.get_mut(claimed.id()) {
            Some(row) if owns_claim(row.send_status(), row.version(), claimed.version()) => {
                row.record_failure(error, next_retry_time, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let mut t = self.tables()?;
        let mut n = 0;
        for row in t.outbox.values_mut() {
            if row.send_status() == MessageStatus::Processing && row.last_updated_date() < stale_before
            {
                row.record_failure(STALE_ERROR, now, now);
                n += 1;
            }
        }
        Ok(n)
    }

    async fn dead_letters(&self, max_retry_count: u32, limit: usize) -> Result<Vec<OutboxMessage>> {
        let t = self.tables()?;
        Ok(t.outbox
            .values()
            .filter(|r| is_dead_letter(*r, max_retry_count))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InboxRepository for InMemoryMessageStore {
    async fn try_insert(&self, message: InboxMessage) -> Result<InsertOutcome> {
        let mut t = self.tables()?;
        if t.inbox.contains_key(message.id()) {
            return Ok(InsertOutcome::Duplicate);
        }
        t.inbox.insert(message.id().to_string(), message);
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: &str) -> Result<Option<InboxMessage>> {
        Ok(self.tables()?.inbox.get(id).cloned())
    }

    async fn fetch_retry_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_retry_count: u32,
    ) -> Result<Vec<InboxMessage>> {
        let t = self.tables()?;
        Ok(select_candidates(
            t.inbox
                .values()
                .filter(|r| r.consume_status() == MessageStatus::Failed),
            now,
            batch_size,
            max_retry_count,
        )
        .into_iter()
        .cloned()
        .collect())
    }

    async fn try_claim(
        &self,
        id: &str,
        expected_status: MessageStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<InboxMessage>> {
        let mut t = self.tables()?;
        let Some(row) = t.inbox.get_mut(id) else {
            return Ok(None);
        };
        if !expected_status.is_claimable()
            || row.consume_status() != expected_status
            || row.version() != expected_version
        {
            return Ok(None);
        }
        row.set_status(MessageStatus::Processing, now);
        Ok(Some(row.clone()))
    }

    async fn mark_failed(
        &self,
        claimed: &InboxMessage,
        error: &str,
        next_retry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.tables()?;
        match t.inbox.get_mut(claimed.id()) {
            Some(row) if owns_claim(row.consume_status(), row.version(), claimed.version()) => {
                row.record_failure(error, next_retry_time, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let mut t = self.tables()?;
        let mut n = 0;
        for row in t.inbox.values_mut() {
            let abandoned = matches!(
                row.consume_status(),
                MessageStatus::New | MessageStatus::Processing
            );
            if abandoned && row.last_updated_date() < stale_before {
                row.record_failure(STALE_ERROR, now, now);
                n += 1;
            }
        }
        Ok(n)
    }

    async fn dead_letters(&self, max_retry_count: u32, limit: usize) -> Result<Vec<InboxMessage>> {
        let t = self.tables()?;
        Ok(t.inbox
            .values()
            .filter(|r| is_dead_letter(*r, max_retry_count))
            .take(limit)
            .cloned()
            .collect())
    }
}

fn owns_claim(status: MessageStatus, version: i64, claimed_version: i64) -> bool {
    status == MessageStatus::Processing && version == claimed_version
}

#[async_trait]
impl UnitOfWorkManager for InMemoryMessageStore {
    async fn begin(&self) -> Result<Arc<dyn UnitOfWork>> {
        Ok(Arc::new(InMemoryUnitOfWork::new(self.clone())))
    }
}

#[derive(Default)]
struct Staged {
    completed: bool,
    rolled_back: bool,
    entities: Vec<(String, Value)>,
    outbox: Vec<OutboxMessage>,
    inbox_processed: Vec<InboxMessage>,
    on_completed: Vec<CompletedAction>,
}

/// 内存工作单元：提交前所有写入仅暂存在本对象内
pub struct InMemoryUnitOfWork {
    id: String,
    store: InMemoryMessageStore,
    staged: Mutex<Staged>,
}

impl InMemoryUnitOfWork {
    pub fn new(store: InMemoryMessageStore) -> Self {
        Self {
            id: Ulid::new().to_string(),
            store,
            staged: Mutex::new(Staged::default()),
        }
    }

    fn staged(&self) -> Result<MutexGuard<'_, Staged>> {
        self.staged
            .lock()
            .map_err(|_| MessagingError::unit_of_work("unit of work lock poisoned"))
    }

    fn active_staged(&self) -> Result<MutexGuard<'_, Staged>> {
        let staged = self.staged()?;
        if staged.completed || staged.rolled_back {
            return Err(MessagingError::unit_of_work(format!(
                "unit of work {} is no longer active",
                self.id
            )));
        }
        Ok(staged)
    }

    /// 暂存一条业务写入
    pub fn put_entity(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.active_staged()?.entities.push((key.into(), value));
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.staged()
            .map(|s| !s.completed && !s.rolled_back)
            .unwrap_or(false)
    }

    async fn insert_outbox(&self, message: OutboxMessage) -> Result<()> {
        self.active_staged()?.outbox.push(message);
        Ok(())
    }

    async fn mark_inbox_processed(&self, claimed: &InboxMessage) -> Result<()> {
        self.active_staged()?.inbox_processed.push(claimed.clone());
        Ok(())
    }

    fn on_completed(&self, action: CompletedAction) {
        match self.active_staged() {
            Ok(mut staged) => staged.on_completed.push(action),
            Err(e) => warn!(transaction = %self.id, error = %e, "completion hook dropped"),
        }
    }

    async fn complete(&self) -> Result<()> {
        let hooks = {
            let mut staged = self.active_staged()?;
            let mut t = self.store.tables()?;

            // 先校验，全部通过后再应用，保证原子性
            let conflict = staged.outbox.iter().find(|m| t.outbox.contains_key(m.id()));
            if let Some(m) = conflict {
                let reason = format!("duplicate outbox message id: {}", m.id());
                staged.rolled_back = true;
                return Err(MessagingError::unit_of_work(reason));
            }
            let lost = staged.inbox_processed.iter().find(|claimed| {
                t.inbox.get(claimed.id()).is_none_or(|row| {
                    !owns_claim(row.consume_status(), row.version(), claimed.version())
                })
            });
            if let Some(m) = lost {
                let reason = format!("inbox claim lost before commit: {}", m.id());
                staged.rolled_back = true;
                return Err(MessagingError::unit_of_work(reason));
            }

            let now = Utc::now();
            for (k, v) in staged.entities.drain(..) {
                t.entities.insert(k, v);
            }
            for m in staged.outbox.drain(..) {
                t.outbox.insert(m.id().to_string(), m);
            }
            for claimed in staged.inbox_processed.drain(..) {
                if let Some(row) = t.inbox.get_mut(claimed.id()) {
                    row.set_status(MessageStatus::Processed, now);
                }
            }
            staged.completed = true;
            std::mem::take(&mut staged.on_completed)
        };

        for hook in hooks {
            tokio::spawn(hook());
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut staged = self.staged()?;
        if staged.completed {
            return Err(MessagingError::unit_of_work(format!(
                "unit of work {} already completed",
                self.id
            )));
        }
        staged.rolled_back = true;
        staged.entities.clear();
        staged.outbox.clear();
        staged.inbox_processed.clear();
        staged.on_completed.clear();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ActorContext, BusMessage, RoutingKey};
    use serde_json::json;

    fn outbox_row(payload: u32) -> OutboxMessage {
        let msg = BusMessage::new(payload, "svc", &ActorContext::system(), RoutingKey::new("k"));
        OutboxMessage::from_bus_message(&msg, None, None, None).unwrap()
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_rollback_discards() {
        let store = InMemoryMessageStore::new();
        let uow = store.begin().await.unwrap();
        let mem = uow.as_any().downcast_ref::<InMemoryUnitOfWork>().unwrap();
        mem.put_entity("order-1", json!({"state": "placed"})).unwrap();
        uow.insert_outbox(outbox_row(1)).await.unwrap();

        assert!(store.entity("order-1").unwrap().is_none());
        assert!(store.outbox_messages().unwrap().is_empty());

        uow.rollback().await.unwrap();
        assert!(!uow.is_active());
        assert!(uow.insert_outbox(outbox_row(2)).await.is_err());
        assert!(store.outbox_messages().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_applies_entity_and_outbox_together() {
        let store = InMemoryMessageStore::new();
        let uow = store.begin().await.unwrap();
        let mem = uow.as_any().downcast_ref::<InMemoryUnitOfWork>().unwrap();
        mem.put_entity("order-1", json!({"state": "placed"})).unwrap();
        let row = outbox_row(1);
        let id = row.id().to_string();
        uow.insert_outbox(row).await.unwrap();
        uow.complete().await.unwrap();

        assert_eq!(store.entity("order-1").unwrap(), Some(json!({"state": "placed"})));
        let stored = OutboxRepository::get(&store, &id).await.unwrap().unwrap();
        assert_eq!(stored.send_status(), MessageStatus::New);
        assert!(uow.complete().await.is_err());
    }

    #[tokio::test]
    async fn claim_is_conditional_on_status_and_version() {
        let store = InMemoryMessageStore::new();
        let row = outbox_row(1);
        let id = row.id().to_string();
        OutboxRepository::insert(&store, row).await.unwrap();
        let now = Utc::now();

        let claimed = OutboxRepository::try_claim(&store, &id, MessageStatus::New, 0, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.send_status(), MessageStatus::Processing);
        assert!(
            OutboxRepository::try_claim(&store, &id, MessageStatus::New, 0, now)
                .await
                .unwrap()
                .is_none()
        );

        assert!(
            OutboxRepository::mark_failed(&store, &claimed, "boom", now, now)
                .await
                .unwrap()
        );
        // 旧的认领凭据不能再次写入
        assert!(!store.mark_processed(&claimed, now).await.unwrap());
        let failed = OutboxRepository::get(&store, &id).await.unwrap().unwrap();
        assert_eq!(failed.retry_count(), 1);
        assert_eq!(failed.last_send_error(), Some("boom"));
    }

    #[tokio::test]
    async fn hooks_registered_after_completion_never_run() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = InMemoryMessageStore::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let hook = |ran: &Arc<AtomicUsize>| -> CompletedAction {
            let ran = ran.clone();
            Box::new(move || {
                Box::pin(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
            })
        };

        let uow = store.begin().await.unwrap();
        uow.on_completed(hook(&ran));
        uow.complete().await.unwrap();
        uow.on_completed(hook(&ran));

        let rolled = store.begin().await.unwrap();
        rolled.rollback().await.unwrap();
        rolled.on_completed(hook(&ran));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
