use courier_domain::envelope::{BusMessagePayload, RoutingKey};
use courier_macros::bus_message;
use serde::{Deserialize, Serialize};

#[bus_message]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Heartbeat {
    node: String,
}

fn main() {
    assert_eq!(Heartbeat::MESSAGE_GROUP, "FreeFormatMessage");
    assert_eq!(Heartbeat::MESSAGE_TYPE, "Heartbeat");

    let beat = Heartbeat { node: "n1".into() };
    assert_eq!(beat.message_action(), None);
    assert_eq!(
        RoutingKey::resolve(&beat, "monitor").as_str(),
        "FreeFormatMessage.monitor.Heartbeat"
    );
}
