use std::time::Duration;

use uuid::Uuid;

use crate::domain::order::OrderError;

// ============================================================================
// Error Taxonomy
// ============================================================================
//
// Three families of failure flow through the core:
// - Transient infrastructure errors (storage hiccups, broker timeouts): retried
// - Permanent business errors (invalid transitions, validation): never retried
// - Circuit-open errors raised by the breaker itself: never retried, and never
//   surfaced as a failure of the business operation
//
// ============================================================================

/// Classifies an error as transient (worth retrying) or permanent.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Errors raised by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("concurrent modification of order {order_id}: expected version {expected}, found {actual}")]
    Conflict {
        order_id: Uuid,
        expected: i64,
        actual: i64,
    },
}

impl IsTransient for StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

/// Errors raised by the message broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker did not acknowledge within {0:?}")]
    Timeout(Duration),

    #[error("broker rejected message: {0}")]
    Rejected(String),
}

impl IsTransient for BrokerError {
    fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_) | BrokerError::Timeout(_))
    }
}

/// Why a single publication attempt did not reach the broker.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PublishError {
    /// Label used for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            PublishError::CircuitOpen(_) => "circuit_open",
            PublishError::Broker(BrokerError::Timeout(_)) => "timeout",
            PublishError::Broker(_) => "broker",
            PublishError::Serialization(_) => "serialization",
        }
    }
}

impl IsTransient for PublishError {
    fn is_transient(&self) -> bool {
        match self {
            // Worth retrying later, the breaker will probe again once its wait elapses
            PublishError::CircuitOpen(_) => true,
            PublishError::Broker(e) => e.is_transient(),
            PublishError::Serialization(_) => false,
        }
    }
}

/// Failure of a business operation as seen by its caller.
///
/// Event publication trouble never appears here.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Business(#[from] OrderError),

    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("storage unavailable after {attempts} attempts: {source}")]
    StorageExhausted {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("failed to encode domain event: {0}")]
    EventEncoding(#[from] serde_json::Error),
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        ServiceError::Storage(e)
    }
}

impl IsTransient for ServiceError {
    fn is_transient(&self) -> bool {
        match self {
            ServiceError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_classification() {
        assert!(StorageError::Unavailable("pool exhausted".into()).is_transient());
        assert!(!StorageError::Constraint("duplicate key".into()).is_transient());
        assert!(!StorageError::Conflict {
            order_id: Uuid::new_v4(),
            expected: 1,
            actual: 2
        }
        .is_transient());
    }

    #[test]
    fn test_service_error_only_retries_transient_storage() {
        assert!(ServiceError::Storage(StorageError::Unavailable("down".into())).is_transient());
        assert!(!ServiceError::Business(OrderError::EmptyItems).is_transient());
        assert!(!ServiceError::NotFound(Uuid::new_v4()).is_transient());
    }

    #[test]
    fn test_publish_error_reasons() {
        assert_eq!(PublishError::CircuitOpen("broker-publisher".into()).reason(), "circuit_open");
        assert_eq!(
            PublishError::Broker(BrokerError::Timeout(Duration::from_secs(5))).reason(),
            "timeout"
        );
        assert_eq!(
            PublishError::Broker(BrokerError::Rejected("too large".into())).reason(),
            "broker"
        );
        assert!(!PublishError::Broker(BrokerError::Rejected("too large".into())).is_transient());
    }
}
