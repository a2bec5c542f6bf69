// ============================================================================
// Events - the immutable facts handed from the order core to the broker
// ============================================================================

mod attempt;
mod event;

pub use attempt::PublicationAttempt;
pub use event::{
    all_topics, deserialize_event, serialize_event, DomainEvent, EventType, DEAD_LETTER_TOPIC,
};
