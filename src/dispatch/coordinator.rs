use std::sync::Arc;

use super::{EventBuffer, Transaction};
use crate::correlation::CorrelationId;
use crate::errors::StorageError;
use crate::messaging::{EventPublisher, PublishOutcome};

/// What happened to the events released after a commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub outcomes: Vec<PublishOutcome>,
}

impl DispatchReport {
    pub fn released(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }
}

#[derive(Clone)]
pub struct DispatchCoordinator {
    publisher: Arc<dyn EventPublisher>,
}

impl DispatchCoordinator {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    pub fn buffer(&self, correlation_id: CorrelationId) -> EventBuffer {
        EventBuffer::new(correlation_id)
    }

    /// Commit `tx`, then publish the buffered events in the order they were
    /// recorded. A failed commit discards the buffer and returns the error.
    ///
    /// Publication trouble is reported in the `DispatchReport`, never as an
    /// error.
    pub async fn commit<T: Transaction>(
        &self,
        tx: T,
        buffer: EventBuffer,
    ) -> Result<DispatchReport, StorageError> {
        let correlation_id = buffer.correlation_id();

        if let Err(e) = tx.commit().await {
            tracing::debug!(
                correlation_id = %correlation_id,
                discarded = buffer.len(),
                error = %e,
                "Commit failed, discarding buffered events"
            );
            return Err(e);
        }

        let events = buffer.into_events();
        let mut report = DispatchReport {
            outcomes: Vec::with_capacity(events.len()),
        };
        for event in &events {
            report.outcomes.push(self.publisher.publish(event).await);
        }

        tracing::debug!(
            correlation_id = %correlation_id,
            released = report.released(),
            delivered = report.delivered(),
            "Released events after commit"
        );
        Ok(report)
    }

    /// Roll back `tx` and drop the buffered events unpublished.
    pub async fn rollback<T: Transaction>(
        &self,
        tx: T,
        buffer: EventBuffer,
    ) -> Result<(), StorageError> {
        tracing::debug!(
            correlation_id = %buffer.correlation_id(),
            discarded = buffer.len(),
            "Rolling back, discarding buffered events"
        );
        drop(buffer);
        tx.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DomainEvent, EventType};
    use crate::messaging::PublisherMode;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use uuid::Uuid;

    /// Appends to the same log as `FakeTx`, so tests see commit/publish order.
    struct RecordingPublisher {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: &DomainEvent) -> PublishOutcome {
            self.log.lock().push(format!("publish:{}", event.event_type()));
            PublishOutcome::Delivered
        }

        fn mode(&self) -> PublisherMode {
            PublisherMode::InProcess
        }
    }

    struct FakeTx {
        log: Arc<Mutex<Vec<String>>>,
        fail_commit: bool,
    }

    #[async_trait]
    impl Transaction for FakeTx {
        async fn commit(self) -> Result<(), StorageError> {
            if self.fail_commit {
                return Err(StorageError::Unavailable("connection reset".into()));
            }
            self.log.lock().push("commit".into());
            Ok(())
        }

        async fn rollback(self) -> Result<(), StorageError> {
            self.log.lock().push("rollback".into());
            Ok(())
        }
    }

    fn setup() -> (DispatchCoordinator, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = DispatchCoordinator::new(Arc::new(RecordingPublisher { log: log.clone() }));
        (coordinator, log)
    }

    fn filled_buffer(coordinator: &DispatchCoordinator) -> EventBuffer {
        let mut buffer = coordinator.buffer(CorrelationId::new());
        let order_id = Uuid::new_v4();
        buffer.record_body(EventType::OrderCreated, order_id, &json!({})).unwrap();
        buffer.record_body(EventType::OrderPaid, order_id, &json!({})).unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_events_released_only_after_commit_in_order() {
        let (coordinator, log) = setup();
        let buffer = filled_buffer(&coordinator);
        let tx = FakeTx { log: log.clone(), fail_commit: false };

        let report = coordinator.commit(tx, buffer).await.unwrap();

        assert_eq!(report.released(), 2);
        assert_eq!(report.delivered(), 2);
        assert_eq!(
            *log.lock(),
            vec!["commit", "publish:OrderCreated", "publish:OrderPaid"]
        );
    }

    #[tokio::test]
    async fn test_rollback_publishes_nothing() {
        let (coordinator, log) = setup();
        let buffer = filled_buffer(&coordinator);
        let tx = FakeTx { log: log.clone(), fail_commit: false };

        coordinator.rollback(tx, buffer).await.unwrap();

        assert_eq!(*log.lock(), vec!["rollback"]);
    }

    #[tokio::test]
    async fn test_failed_commit_publishes_nothing() {
        let (coordinator, log) = setup();
        let buffer = filled_buffer(&coordinator);
        let tx = FakeTx { log: log.clone(), fail_commit: true };

        let result = coordinator.commit(tx, buffer).await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert!(log.lock().is_empty());
    }
}
