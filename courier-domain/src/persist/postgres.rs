//! Postgres 消息存储（PgMessageStore）
//!
//! 基于 sqlx 运行时查询实现发件箱、收件箱仓储与工作单元：
//! - 认领/推进均为 `UPDATE ... WHERE id = $1 AND <status> = $2 AND version = $3`；
//! - 收件箱去重依赖主键冲突（`ON CONFLICT (id) DO NOTHING`）；
//! - 分区 FIFO 以 `NOT EXISTS` 子查询表达，阻塞规则与内存实现一致。
//!
//! 表结构见 `migrations/0001_outbox_inbox.sql`。
//!
use super::{InboxRepository, InsertOutcome, OutboxRepository};
use crate::error::{MessagingError, MessagingResult as Result};
use crate::inbox::InboxMessage;
use crate::outbox::OutboxMessage;
use crate::status::MessageStatus;
use crate::uow::{CompletedAction, UnitOfWork, UnitOfWorkManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::any::Any;
use std::sync::{Arc, Mutex};
use ulid::Ulid;

const STALE_ERROR: &str = "processing timed out";

const OUTBOX_COLUMNS: &str = "id, routing_key, message, send_status, retry_count, next_retry_time, \
     last_send_error, created_date, last_updated_date, sub_queue_prefix, retry_interval_seconds, \
     source_transaction_id, version";

const INBOX_COLUMNS: &str = "id, tracking_id, consumer_by, routing_key, message, consume_status, \
     retry_count, next_retry_time, last_consume_error, created_date, last_updated_date, version";

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxMessage> {
    let status: String = row.try_get("send_status")?;
    let retry_count: i32 = row.try_get("retry_count")?;
    let retry_interval: Option<i64> = row.try_get("retry_interval_seconds")?;
    Ok(OutboxMessage::builder()
        .id(row.try_get("id")?)
        .routing_key(row.try_get("routing_key")?)
        .message(row.try_get("message")?)
        .send_status(status.parse()?)
        .retry_count(retry_count.max(0) as u32)
        .next_retry_time(row.try_get("next_retry_time")?)
        .maybe_last_send_error(row.try_get("last_send_error")?)
        .created_date(row.try_get("created_date")?)
        .last_updated_date(row.try_get("last_updated_date")?)
        .maybe_sub_queue_prefix(row.try_get("sub_queue_prefix")?)
        .maybe_retry_interval_seconds(retry_interval.map(|v| v.max(0) as u64))
        .maybe_source_transaction_id(row.try_get("source_transaction_id")?)
        .version(row.try_get("version")?)
        .build())
}

fn inbox_from_row(row: &PgRow) -> Result<InboxMessage> {
    let status: String = row.try_get("consume_status")?;
    let retry_count: i32 = row.try_get("retry_count")?;
    Ok(InboxMessage::builder()
        .id(row.try_get("id")?)
        .tracking_id(row.try_get("tracking_id")?)
        .consumer_by(row.try_get("consumer_by")?)
        .routing_key(row.try_get("routing_key")?)
        .message(row.try_get("message")?)
        .consume_status(status.parse()?)
        .retry_count(retry_count.max(0) as u32)
        .next_retry_time(row.try_get("next_retry_time")?)
        .maybe_last_consume_error(row.try_get("last_consume_error")?)
        .created_date(row.try_get("created_date")?)
        .last_updated_date(row.try_get("last_updated_date")?)
        .version(row.try_get("version")?)
        .build())
}

async fn insert_outbox_row<'e, E>(executor: E, m: &OutboxMessage) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "INSERT INTO outbox_messages ({OUTBOX_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
    );
    sqlx::query(&sql)
        .bind(m.id())
        .bind(m.routing_key())
        .bind(m.message())
        .bind(m.send_status().as_str())
        .bind(to_i32(m.retry_count()))
        .bind(m.next_retry_time())
        .bind(m.last_send_error())
        .bind(m.created_date())
        .bind(m.last_updated_date())
        .bind(m.sub_queue_prefix())
        .bind(m.retry_interval_seconds().map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
        .bind(m.source_transaction_id())
        .bind(m.version())
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl OutboxRepository for PgMessageStore {
    async fn insert(&self, message: OutboxMessage) -> Result<()> {
        insert_outbox_row(&self.pool, &message).await
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxMessage>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(outbox_from_row).transpose()
    }

    async fn fetch_sweep_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_retry_count: u32,
    ) -> Result<Vec<OutboxMessage>> {
        // 同分区更早的行若未处理完、非死信且未到期，则阻塞其后的行
        let sql = format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox_messages o
            WHERE o.send_status IN ('New', 'Failed')
              AND o.next_retry_time <= $1
              AND o.retry_count <= $2
              AND (o.sub_queue_prefix IS NULL OR NOT EXISTS (
                  SELECT 1 FROM outbox_messages p
                  WHERE p.sub_queue_prefix = o.sub_queue_prefix
                    AND (p.created_date, p.id) < (o.created_date, o.id)
                    AND p.send_status <> 'Processed'
                    AND NOT (p.send_status = 'Failed' AND p.retry_count > $2)
                    AND NOT (p.send_status IN ('New', 'Failed')
                             AND p.next_retry_time <= $1
                             AND p.retry_count <= $2)
              ))
            ORDER BY o.sub_queue_prefix NULLS FIRST, o.created_date, o.id
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(to_i32(max_retry_count))
            .bind(to_i64(batch_size))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(outbox_from_row).collect()
    }

    async fn has_pending_predecessor(
        &self,
        message: &OutboxMessage,
        max_retry_count: u32,
    ) -> Result<bool> {
        let Some(partition) = message.sub_queue_prefix() else {
            return Ok(false);
        };
        let pending: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM outbox_messages p
                WHERE p.sub_queue_prefix = $1
                  AND (p.created_date, p.id) < ($2, $3)
                  AND p.send_status <> 'Processed'
                  AND NOT (p.send_status = 'Failed' AND p.retry_count > $4)
            )
            "#,
        )
        .bind(partition)
        .bind(message.created_date())
        .bind(message.id())
        .bind(to_i32(max_retry_count))
        .fetch_one(&self.pool)
        .await?;
        Ok(pending)
    }

    async fn try_claim(
        &self,
        id: &str,
        expected_status: MessageStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxMessage>> {
        if !expected_status.is_claimable() {
            return Ok(None);
        }
        let sql = format!(
            "UPDATE outbox_messages \
             SET send_status = 'Processing', version = version + 1, last_updated_date = $4 \
             WHERE id = $1 AND send_status = $2 AND version = $3 \
             RETURNING {OUTBOX_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(expected_status.as_str())
            .bind(expected_version)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(outbox_from_row).transpose()
    }

    async fn mark_processed(&self, claimed: &OutboxMessage, now: DateTime<Utc>) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET send_status = 'Processed', version = version + 1, last_updated_date = $3
            WHERE id = $1 AND send_status = 'Processing' AND version = $2
            "#,
        )
        .bind(claimed.id())
        .bind(claimed.version())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        claimed: &OutboxMessage,
        error: &str,
        next_retry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET send_status = 'Failed',
                retry_count = retry_count + 1,
                last_send_error = $3,
                next_retry_time = $4,
                version = version + 1,
                last_updated_date = $5
            WHERE id = $1 AND send_status = 'Processing' AND version = $2
            "#,
        )
        .bind(claimed.id())
        .bind(claimed.version())
        .bind(error)
        .bind(next_retry_time)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let done = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET send_status = 'Failed',
                retry_count = retry_count + 1,
                last_send_error = $2,
                next_retry_time = $3,
                version = version + 1,
                last_updated_date = $3
            WHERE send_status = 'Processing' AND last_updated_date < $1
            "#,
        )
        .bind(stale_before)
        .bind(STALE_ERROR)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() as usize)
    }

    async fn dead_letters(&self, max_retry_count: u32, limit: usize) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages \
             WHERE send_status = 'Failed' AND retry_count > $1 \
             ORDER BY created_date, id LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(to_i32(max_retry_count))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(outbox_from_row).collect()
    }
}

#[async_trait]
impl InboxRepository for PgMessageStore {
    async fn try_insert(&self, m: InboxMessage) -> Result<InsertOutcome> {
        let sql = format!(
            "INSERT INTO inbox_messages ({INBOX_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO NOTHING"
        );
        let done = sqlx::query(&sql)
            .bind(m.id())
            .bind(m.tracking_id())
            .bind(m.consumer_by())
            .bind(m.routing_key())
            .bind(m.message())
            .bind(m.consume_status().as_str())
            .bind(to_i32(m.retry_count()))
            .bind(m.next_retry_time())
            .bind(m.last_consume_error())
            .bind(m.created_date())
            .bind(m.last_updated_date())
            .bind(m.version())
            .execute(&self.pool)
            .await?;
        Ok(if done.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn get(&self, id: &str) -> Result<Option<InboxMessage>> {
        let sql = format!("SELECT {INBOX_COLUMNS} FROM inbox_messages WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(inbox_from_row).transpose()
    }

    async fn fetch_retry_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_retry_count: u32,
    ) -> Result<Vec<InboxMessage>> {
        let sql = format!(
            "SELECT {INBOX_COLUMNS} FROM inbox_messages \
             WHERE consume_status = 'Failed' AND next_retry_time <= $1 AND retry_count <= $2 \
             ORDER BY created_date, id LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(to_i32(max_retry_count))
            .bind(to_i64(batch_size))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(inbox_from_row).collect()
    }

    async fn try_claim(
        &self,
        id: &str,
        expected_status: MessageStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<InboxMessage>> {
        if !expected_status.is_claimable() {
            return Ok(None);
        }
        let sql = format!(
            "UPDATE inbox_messages \
             SET consume_status = 'Processing', version = version + 1, last_updated_date = $4 \
             WHERE id = $1 AND consume_status = $2 AND version = $3 \
             RETURNING {INBOX_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(expected_status.as_str())
            .bind(expected_version)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(inbox_from_row).transpose()
    }

    async fn mark_failed(
        &self,
        claimed: &InboxMessage,
        error: &str,
        next_retry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET consume_status = 'Failed',
                retry_count = retry_count + 1,
                last_consume_error = $3,
                next_retry_time = $4,
                version = version + 1,
                last_updated_date = $5
            WHERE id = $1 AND consume_status = 'Processing' AND version = $2
            "#,
        )
        .bind(claimed.id())
        .bind(claimed.version())
        .bind(error)
        .bind(next_retry_time)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let done = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET consume_status = 'Failed',
                retry_count = retry_count + 1,
                last_consume_error = $2,
                next_retry_time = $3,
                version = version + 1,
                last_updated_date = $3
            WHERE consume_status IN ('New', 'Processing') AND last_updated_date < $1
            "#,
        )
        .bind(stale_before)
        .bind(STALE_ERROR)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() as usize)
    }

    async fn dead_letters(&self, max_retry_count: u32, limit: usize) -> Result<Vec<InboxMessage>> {
        let sql = format!(
            "SELECT {INBOX_COLUMNS} FROM inbox_messages \
             WHERE consume_status = 'Failed' AND retry_count > $1 \
             ORDER BY created_date, id LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(to_i32(max_retry_count))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(inbox_from_row).collect()
    }
}

#[async_trait]
impl UnitOfWorkManager for PgMessageStore {
    async fn begin(&self) -> Result<Arc<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Arc::new(PgUnitOfWork::new(tx)))
    }
}

/// Postgres 工作单元：持有一个打开的事务，提交后执行回调
pub struct PgUnitOfWork {
    id: String,
    tx: tokio::sync::Mutex<Option<Transaction<'static, Postgres>>>,
    on_completed: Mutex<Vec<CompletedAction>>,
}

impl PgUnitOfWork {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            tx: tokio::sync::Mutex::new(Some(tx)),
            on_completed: Mutex::new(Vec::new()),
        }
    }

    /// 取得事务以执行业务写入；事务已结束时守卫内为 `None`
    pub async fn transaction(
        &self,
    ) -> tokio::sync::MutexGuard<'_, Option<Transaction<'static, Postgres>>> {
        self.tx.lock().await
    }

    fn inactive(&self) -> MessagingError {
        MessagingError::unit_of_work(format!("unit of work {} is no longer active", self.id))
    }

    fn clear_hooks(&self) {
        if let Ok(mut hooks) = self.on_completed.lock() {
            hooks.clear();
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.tx.try_lock().map(|g| g.is_some()).unwrap_or(true)
    }

    async fn insert_outbox(&self, message: OutboxMessage) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| self.inactive())?;
        insert_outbox_row(&mut **tx, &message).await
    }

    async fn mark_inbox_processed(&self, claimed: &InboxMessage) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| self.inactive())?;
        let done = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET consume_status = 'Processed', version = version + 1, last_updated_date = $3
            WHERE id = $1 AND consume_status = 'Processing' AND version = $2
            "#,
        )
        .bind(claimed.id())
        .bind(claimed.version())
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(MessagingError::unit_of_work(format!(
                "inbox claim lost before commit: {}",
                claimed.id()
            )));
        }
        Ok(())
    }

    fn on_completed(&self, action: CompletedAction) {
        if let Ok(mut hooks) = self.on_completed.lock() {
            hooks.push(action);
        }
    }

    async fn complete(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(|| self.inactive())?;
        if let Err(e) = tx.commit().await {
            self.clear_hooks();
            return Err(e.into());
        }
        let hooks = self
            .on_completed
            .lock()
            .map(|mut g| std::mem::take(&mut *g))
            .unwrap_or_default();
        for hook in hooks {
            tokio::spawn(hook());
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(|| self.inactive())?;
        self.clear_hooks();
        tx.rollback().await?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
