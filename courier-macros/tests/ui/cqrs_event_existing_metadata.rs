use courier_application::cqrs::{CqrsEvent, CqrsEventMetadata};
use courier_macros::cqrs_event;
use serde::{Deserialize, Serialize};

#[cqrs_event(event_type = "EntityEvent", name = "CustomerNameChanged")]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CustomerRenamed {
    customer_id: String,
    #[serde(default)]
    metadata: CqrsEventMetadata,
    to: String,
}

fn main() {
    let event = CustomerRenamed {
        customer_id: "c-1".into(),
        metadata: CqrsEventMetadata::new(),
        to: "Ada".into(),
    };
    assert_eq!(CustomerRenamed::EVENT_NAME, "CustomerNameChanged");
    assert_eq!(event.event_action(), None);
    assert!(event.metadata().wait_handlers().is_empty());
}
