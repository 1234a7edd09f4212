use super::BusMessagePayload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 消息路由键
///
/// 默认形态为 `{MessageGroup}.{ProducerApplicationName}.{MessageType}.{Action}`，
/// 空段会被省略。消费方可用主题风格的模式过滤：`*` 匹配恰好一段，`#` 匹配零或多段。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub const SEPARATOR: char = '.';

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn compose(
        message_group: &str,
        producer_application: &str,
        message_type: &str,
        action: Option<&str>,
    ) -> Self {
        let key = [
            Some(message_group),
            Some(producer_application),
            Some(message_type),
            action,
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".");

        Self(key)
    }

    /// 消息类型自描述的路由键优先，否则按默认规则拼装
    pub fn resolve<P>(payload: &P, producer_application: &str) -> Self
    where
        P: BusMessagePayload,
    {
        payload.self_routing_key().unwrap_or_else(|| {
            Self::compose(
                P::MESSAGE_GROUP,
                producer_application,
                P::MESSAGE_TYPE,
                payload.message_action(),
            )
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR)
    }

    /// 主题风格匹配
    pub fn matches(&self, pattern: &str) -> bool {
        let pattern: Vec<&str> = pattern.split(Self::SEPARATOR).collect();
        let key: Vec<&str> = self.segments().collect();
        match_segments(&pattern, &key)
    }
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some((p, rest)), _) if *p == "#" => {
            match_segments(rest, key) || (!key.is_empty() && match_segments(pattern, &key[1..]))
        }
        (Some(_), None) => false,
        (Some((p, prest)), Some((k, krest))) => (*p == "*" || p == k) && match_segments(prest, krest),
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoutingKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OrderPlaced {
        priority: bool,
    }

    impl BusMessagePayload for OrderPlaced {
        const MESSAGE_GROUP: &'static str = "EntityEvent";
        const MESSAGE_TYPE: &'static str = "OrderPlaced";

        fn message_action(&self) -> Option<&str> {
            Some("Created")
        }

        fn self_routing_key(&self) -> Option<RoutingKey> {
            self.priority.then(|| RoutingKey::new("priority.orders"))
        }
    }

    #[test]
    fn default_key_is_composed_deterministically() {
        let key = RoutingKey::resolve(&OrderPlaced { priority: false }, "order-service");
        assert_eq!(key.as_str(), "EntityEvent.order-service.OrderPlaced.Created");
        assert_eq!(
            RoutingKey::compose("Command", "svc", "Ping", None).as_str(),
            "Command.svc.Ping"
        );
    }

    #[test]
    fn self_described_key_wins() {
        let key = RoutingKey::resolve(&OrderPlaced { priority: true }, "order-service");
        assert_eq!(key.as_str(), "priority.orders");
    }

    #[test]
    fn topic_patterns() {
        let key = RoutingKey::new("EntityEvent.order-service.OrderPlaced.Created");
        assert!(key.matches("EntityEvent.order-service.OrderPlaced.Created"));
        assert!(key.matches("EntityEvent.*.OrderPlaced.*"));
        assert!(key.matches("EntityEvent.#"));
        assert!(key.matches("#"));
        assert!(key.matches("#.Created"));
        assert!(key.matches("EntityEvent.#.Created"));
        assert!(!key.matches("EntityEvent.*"));
        assert!(!key.matches("CommandEvent.#"));
        assert!(!key.matches("EntityEvent.order-service.OrderPlaced.Created.Extra"));
    }
}
