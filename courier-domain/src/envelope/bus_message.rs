use super::{ActorContext, BusMessagePayload, Identity, RequestContext, RoutingKey, TrackingId};
use crate::error::MessagingResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 总线消息信封
///
/// 身份与请求上下文在构造时从 `ActorContext` 拷贝，之后随信封一起序列化进发件箱；
/// 清扫器在任何进程、任何时刻重投时都不会改写它们。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage<P> {
    tracking_id: TrackingId,
    produce_from: String,
    created_utc_date: DateTime<Utc>,
    payload: P,
    identity: Identity,
    #[serde(default)]
    request_context: RequestContext,
    routing_key: RoutingKey,
}

impl<P> BusMessage<P> {
    pub fn new(
        payload: P,
        produce_from: impl Into<String>,
        actor: &ActorContext,
        routing_key: RoutingKey,
    ) -> Self {
        Self {
            tracking_id: TrackingId::new(),
            produce_from: produce_from.into(),
            created_utc_date: Utc::now(),
            payload,
            identity: actor.identity().clone(),
            request_context: actor.request_context().clone(),
            routing_key,
        }
    }

    /// 按载荷的自描述或默认规则解析路由键
    pub fn for_payload(payload: P, produce_from: impl Into<String>, actor: &ActorContext) -> Self
    where
        P: BusMessagePayload,
    {
        let produce_from = produce_from.into();
        let routing_key = RoutingKey::resolve(&payload, &produce_from);
        Self::new(payload, produce_from, actor, routing_key)
    }

    /// 沿用既有追踪 ID（例如转发上游消息）
    pub fn with_tracking_id(mut self, tracking_id: TrackingId) -> Self {
        self.tracking_id = tracking_id;
        self
    }

    pub fn with_routing_key(mut self, routing_key: RoutingKey) -> Self {
        self.routing_key = routing_key;
        self
    }

    pub fn tracking_id(&self) -> &TrackingId {
        &self.tracking_id
    }

    pub fn produce_from(&self) -> &str {
        &self.produce_from
    }

    pub fn created_utc_date(&self) -> DateTime<Utc> {
        self.created_utc_date
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.request_context
    }

    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    /// 还原发送方主体，供消费方继续向下游传播
    pub fn actor(&self) -> ActorContext {
        ActorContext::new(self.identity.clone(), self.request_context.clone())
    }

    pub fn to_json(&self) -> MessagingResult<String>
    where
        P: Serialize,
    {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> MessagingResult<Self>
    where
        P: DeserializeOwned,
    {
        Ok(serde_json::from_str(raw)?)
    }
}
