// ============================================================================
// Messaging Module
// ============================================================================
//
// Event publication, polymorphic over `EventPublisher::publish`:
// - InProcessPublisher - synchronous, in-process handlers, nothing persisted
// - DurablePublisher   - broker-backed, guarded by the circuit breaker
//
// Exactly one variant is built at startup from configuration. Whatever the
// broker does, `publish` never fails the business operation that produced the
// event: trouble is logged, counted, and routed to re-publication or the
// dead-letter path.
//
// ============================================================================

mod broker;
mod durable;
mod in_memory_broker;
mod in_process;
mod redpanda;
mod republish;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::events::DomainEvent;

pub use broker::{
    BrokerDeadLetterSink, BrokerProducer, Delivery, DeliverySource, FanOutDeadLetterSink,
};
pub use durable::DurablePublisher;
pub use in_memory_broker::{InMemoryBroker, InMemorySubscription};
pub use in_process::{EventHandler, InProcessPublisher};
pub use redpanda::{RedpandaProducer, RedpandaSubscription};
pub use republish::{republish_channel, RepublishConfig, RepublishQueue, RepublishWorker};

/// Where an event went after its publication failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRoute {
    Redelivery,
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Broker accepted the event.
    Delivered,
    /// Handed to in-process handlers; `handlers` of them succeeded.
    Dispatched { handlers: usize },
    /// Queued behind earlier events of the same aggregate that are still pending.
    Deferred { route: FailureRoute },
    /// Broker rejected the event or timed out.
    Failed { route: FailureRoute },
    /// Circuit was open; the broker was not called.
    ShortCircuited { route: FailureRoute },
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered | PublishOutcome::Dispatched { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherMode {
    InProcess,
    Durable,
}

impl fmt::Display for PublisherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublisherMode::InProcess => f.write_str("in-process"),
            PublisherMode::Durable => f.write_str("durable"),
        }
    }
}

impl FromStr for PublisherMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "in-process" | "in_process" | "inprocess" => Ok(PublisherMode::InProcess),
            "durable" | "broker" => Ok(PublisherMode::Durable),
            other => Err(anyhow::anyhow!(
                "unknown publisher mode '{}', expected 'in-process' or 'durable'",
                other
            )),
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one committed event. Never fails the caller.
    async fn publish(&self, event: &DomainEvent) -> PublishOutcome;

    fn mode(&self) -> PublisherMode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_mode_parsing() {
        assert_eq!("durable".parse::<PublisherMode>().unwrap(), PublisherMode::Durable);
        assert_eq!(" In-Process ".parse::<PublisherMode>().unwrap(), PublisherMode::InProcess);
        assert!("kafka-ish".parse::<PublisherMode>().is_err());
    }

    #[test]
    fn test_outcome_delivery_flag() {
        assert!(PublishOutcome::Delivered.is_delivered());
        assert!(PublishOutcome::Dispatched { handlers: 0 }.is_delivered());
        assert!(!PublishOutcome::ShortCircuited { route: FailureRoute::Redelivery }.is_delivered());
    }
}
