use courier_domain::envelope::{BusMessagePayload, RoutingKey};
use courier_macros::bus_message;
use serde::{Deserialize, Serialize};

#[bus_message(group = "EntityEvent", message_type = "Order", action = "Shipped")]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderShipped {
    order_id: String,
}

#[bus_message(routing_key = "legacy.orders.cancelled")]
#[derive(Debug, Clone, Serialize, Deserialize)]
enum OrderCancelled {
    ByCustomer { order_id: String },
    ByMerchant { order_id: String, reason: String },
}

fn main() {
    let shipped = OrderShipped { order_id: "o-1".into() };
    assert_eq!(shipped.message_action(), Some("Shipped"));
    assert_eq!(
        RoutingKey::resolve(&shipped, "warehouse").as_str(),
        "EntityEvent.warehouse.Order.Shipped"
    );

    let cancelled = OrderCancelled::ByCustomer { order_id: "o-2".into() };
    assert_eq!(
        RoutingKey::resolve(&cancelled, "warehouse").as_str(),
        "legacy.orders.cancelled"
    );
}
