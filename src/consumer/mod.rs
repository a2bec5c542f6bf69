// ============================================================================
// Idempotent Consumer
// ============================================================================
//
// Reads committed domain events back from the broker and drives the
// notification side effect exactly once per event_id, even though the broker
// delivers at least once:
//
//   delivery -> decode -> seen? -> Ack(Duplicate)
//                      -> notify -> mark processed -> Ack(Processed)
//                      -> notify fails -> Nack (redelivered)
//                                      -> threshold reached -> dead letter, Ack
//
// The dedup mark is written only after the side effect succeeded and before
// the delivery is acknowledged.
//
// ============================================================================

mod idempotent;
mod in_process;
mod notifier;
mod worker;

pub use idempotent::{AckReason, ConsumerConfig, ConsumerDecision, IdempotentConsumer};
pub use in_process::InProcessConsumer;
pub use notifier::{notification_text, LogNotifier, NotificationSender};
pub use worker::ConsumerWorker;
