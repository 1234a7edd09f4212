use super::RoutingKey;

/// 总线消息载荷的自描述能力
///
/// 可手写实现，也可通过 `#[bus_message(...)]` 宏生成。
pub trait BusMessagePayload {
    /// 消息分组（如 `CommandEvent`、`EntityEvent`、`FreeFormatMessage`）
    const MESSAGE_GROUP: &'static str;

    /// 消息类型名（稳定名称，不依赖 `type_name`）
    const MESSAGE_TYPE: &'static str;

    /// 消息动作（可选），作为默认路由键的最后一段
    fn message_action(&self) -> Option<&str> {
        None
    }

    /// 自描述路由键；返回 `Some` 时覆盖默认拼装规则
    fn self_routing_key(&self) -> Option<RoutingKey> {
        None
    }
}
