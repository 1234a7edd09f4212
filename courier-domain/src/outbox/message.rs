use crate::envelope::BusMessage;
use crate::error::MessagingResult;
use crate::status::SendStatus;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 发件箱行
///
/// 与产生它的业务写入处于同一事务：提交后它的存在即意味着“业务事实已发生，且欠一条消息”。
/// `version` 为并发戳，每次状态写入递增，认领时与状态一起作为条件。
/// Builder 供存储层按列还原行。
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// 行 ID，取信封的追踪 ID
    id: String,
    routing_key: String,
    /// 序列化后的信封（JSON）
    message: String,
    #[builder(default = SendStatus::New)]
    send_status: SendStatus,
    #[builder(default)]
    retry_count: u32,
    next_retry_time: DateTime<Utc>,
    last_send_error: Option<String>,
    created_date: DateTime<Utc>,
    last_updated_date: DateTime<Utc>,
    /// 子队列分区键；同一分区内按创建时间 FIFO 投递
    sub_queue_prefix: Option<String>,
    /// 发送方指定的重试间隔，缺省时使用配置值
    retry_interval_seconds: Option<u64>,
    /// 产生该行的事务（工作单元）ID
    source_transaction_id: Option<String>,
    #[builder(default)]
    version: i64,
}

impl OutboxMessage {
    pub fn from_bus_message<P>(
        message: &BusMessage<P>,
        sub_queue_prefix: Option<String>,
        retry_interval_seconds: Option<u64>,
        source_transaction_id: Option<String>,
    ) -> MessagingResult<Self>
    where
        P: Serialize,
    {
        let now = Utc::now();
        Ok(Self {
            id: message.tracking_id().to_string(),
            routing_key: message.routing_key().to_string(),
            message: message.to_json()?,
            send_status: SendStatus::New,
            retry_count: 0,
            next_retry_time: now,
            last_send_error: None,
            created_date: now,
            last_updated_date: now,
            sub_queue_prefix: sub_queue_prefix.filter(|p| !p.is_empty()),
            retry_interval_seconds,
            source_transaction_id,
            version: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn send_status(&self) -> SendStatus {
        self.send_status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn next_retry_time(&self) -> DateTime<Utc> {
        self.next_retry_time
    }

    pub fn last_send_error(&self) -> Option<&str> {
        self.last_send_error.as_deref()
    }

    pub fn created_date(&self) -> DateTime<Utc> {
        self.created_date
    }

    pub fn last_updated_date(&self) -> DateTime<Utc> {
        self.last_updated_date
    }

    pub fn sub_queue_prefix(&self) -> Option<&str> {
        self.sub_queue_prefix.as_deref()
    }

    pub fn retry_interval_seconds(&self) -> Option<u64> {
        self.retry_interval_seconds
    }

    pub fn source_transaction_id(&self) -> Option<&str> {
        self.source_transaction_id.as_deref()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// 行级状态写入：仅由仓储实现在条件更新成功后调用
    pub(crate) fn set_status(&mut self, status: SendStatus, now: DateTime<Utc>) {
        self.send_status = status;
        self.last_updated_date = now;
        self.version += 1;
    }

    pub(crate) fn record_failure(
        &mut self,
        error: &str,
        next_retry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_send_error = Some(error.to_string());
        self.next_retry_time = next_retry_time;
        self.set_status(SendStatus::Failed, now);
    }
}
