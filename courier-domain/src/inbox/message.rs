use crate::envelope::BusMessage;
use crate::error::MessagingResult;
use crate::status::ConsumeStatus;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 收件箱行
///
/// `id` 由追踪 ID 与消费者名拼成，存储层对其施加唯一约束：
/// 同一消息对同一消费者的第二次插入必然失败，这就是去重机制。
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct InboxMessage {
    id: String,
    tracking_id: String,
    /// 逻辑消费者名
    consumer_by: String,
    routing_key: String,
    /// 序列化后的信封（JSON）
    message: String,
    #[builder(default = ConsumeStatus::New)]
    consume_status: ConsumeStatus,
    #[builder(default)]
    retry_count: u32,
    next_retry_time: DateTime<Utc>,
    last_consume_error: Option<String>,
    created_date: DateTime<Utc>,
    last_updated_date: DateTime<Utc>,
    #[builder(default)]
    version: i64,
}

impl InboxMessage {
    pub fn build_id(tracking_id: &str, consumer_by: &str) -> String {
        format!("{tracking_id}_{consumer_by}")
    }

    pub fn from_bus_message<P>(message: &BusMessage<P>, consumer_by: &str) -> MessagingResult<Self>
    where
        P: Serialize,
    {
        Ok(Self::from_raw(
            message.tracking_id().as_str(),
            consumer_by,
            message.routing_key().as_str(),
            message.to_json()?,
        ))
    }

    /// 以原始报文建行，避免对已收到的 JSON 重新序列化
    pub fn from_raw(tracking_id: &str, consumer_by: &str, routing_key: &str, raw: String) -> Self {
        let now = Utc::now();
        Self {
            id: Self::build_id(tracking_id, consumer_by),
            tracking_id: tracking_id.to_string(),
            consumer_by: consumer_by.to_string(),
            routing_key: routing_key.to_string(),
            message: raw,
            consume_status: ConsumeStatus::New,
            retry_count: 0,
            next_retry_time: now,
            last_consume_error: None,
            created_date: now,
            last_updated_date: now,
            version: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    pub fn consumer_by(&self) -> &str {
        &self.consumer_by
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn consume_status(&self) -> ConsumeStatus {
        self.consume_status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn next_retry_time(&self) -> DateTime<Utc> {
        self.next_retry_time
    }

    pub fn last_consume_error(&self) -> Option<&str> {
        self.last_consume_error.as_deref()
    }

    pub fn created_date(&self) -> DateTime<Utc> {
        self.created_date
    }

    pub fn last_updated_date(&self) -> DateTime<Utc> {
        self.last_updated_date
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub(crate) fn set_status(&mut self, status: ConsumeStatus, now: DateTime<Utc>) {
        self.consume_status = status;
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
        self.last_consume_error = Some(error.to_string());
        self.next_retry_time = next_retry_time;
        self.set_status(ConsumeStatus::Failed, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_derived_from_tracking_id_and_consumer() {
        let a = InboxMessage::from_raw("01HX", "BillingConsumer", "k", "{}".into());
        let b = InboxMessage::from_raw("01HX", "AuditConsumer", "k", "{}".into());
        assert_eq!(a.id(), "01HX_BillingConsumer");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.consume_status(), ConsumeStatus::New);
    }
}
