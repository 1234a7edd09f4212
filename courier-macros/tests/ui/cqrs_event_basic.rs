use courier_application::cqrs::{CqrsEvent, CqrsEventMetadata};
use courier_macros::cqrs_event;

#[cqrs_event(event_type = "CommandEvent", action = "Requested")]
#[derive(Debug, Clone)]
struct RefundRequested {
    order_id: String,
    amount: u64,
}

fn main() {
    let event = RefundRequested {
        order_id: "o-1".into(),
        amount: 10,
        metadata: CqrsEventMetadata::new(),
    }
    .with_wait_handler("LedgerHandler");

    assert_eq!(RefundRequested::EVENT_TYPE, "CommandEvent");
    assert_eq!(RefundRequested::EVENT_NAME, "RefundRequested");
    assert_eq!(event.event_action(), Some("Requested"));
    assert!(event.must_wait_handler_execution_finished_immediately("LedgerHandler"));
    assert!(!event.must_wait_handler_execution_finished_immediately("Other"));
}
