// ============================================================================
// Storage Module
// ============================================================================
//
// Durable state owned by this service:
// - processed_events   - the consumer's ProcessedEventSet (Scylla, Redis, memory)
// - dead_letter_queue  - events that exhausted their delivery budget
//
// The broker owns consumer offsets; nothing here duplicates them.
//
// ============================================================================

mod dead_letter;
mod processed_events;
mod redis_store;
mod schema;

pub use dead_letter::{
    DeadLetterOrigin, DeadLetterRecord, DeadLetterSink, DeadLetterStore, DlqStats,
    InMemoryDeadLetterStore, ScyllaDeadLetterStore,
};
pub use processed_events::{
    InMemoryProcessedEventStore, ProcessedEventStore, ScyllaProcessedEventStore,
};
pub use redis_store::RedisProcessedEventStore;
pub use schema::ensure_schema;
