//! 消息信封与身份模型（envelope）
//!
//! 定义每条总线消息携带的线上格式与主体/上下文元数据：
//! - `BusMessage`：信封本体（追踪 ID、来源服务、创建时间、载荷、身份、请求上下文、路由键）；
//! - `Identity` / `RequestContext` / `ActorContext`：发送时刻捕获的调用方主体与请求状态；
//! - `RoutingKey` / `BusMessagePayload`：路由键的自描述与默认拼装规则；
//! - `TrackingId`：时间有序、一经设定不再改变的去重键。

mod actor;
mod bus_message;
mod identity;
mod payload;
mod request_context;
mod routing_key;
mod tracking_id;

pub use actor::ActorContext;
pub use bus_message::BusMessage;
pub use identity::Identity;
pub use payload::BusMessagePayload;
pub use request_context::{ContextKey, RequestContext, keys};
pub use routing_key::RoutingKey;
pub use tracking_id::TrackingId;
