use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::broker::BrokerProducer;
use super::republish::RepublishQueue;
use super::{EventPublisher, FailureRoute, PublishOutcome, PublisherMode};
use crate::errors::{IsTransient, PublishError};
use crate::events::{serialize_event, DomainEvent, PublicationAttempt};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerError};

/// Serialize `event` and send it to its topic, keyed by aggregate id, through
/// the breaker. Returns the broker round-trip time.
pub(crate) async fn send_through_breaker(
    producer: &dyn BrokerProducer,
    breaker: &CircuitBreaker,
    event: &DomainEvent,
) -> Result<Duration, PublishError> {
    let payload = serialize_event(event)?;
    let partition_key = event.partition_key();
    let started = Instant::now();

    match breaker
        .call(producer.send(event.topic(), &partition_key, &payload))
        .await
    {
        Ok(()) => Ok(started.elapsed()),
        Err(CircuitBreakerError::CircuitOpen) => {
            Err(PublishError::CircuitOpen(breaker.name().to_string()))
        }
        Err(CircuitBreakerError::OperationFailed(e)) => Err(PublishError::Broker(e)),
    }
}

/// Broker-backed publisher guarded by the circuit breaker.
pub struct DurablePublisher {
    producer: Arc<dyn BrokerProducer>,
    breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
    republish: RepublishQueue,
}

impl DurablePublisher {
    pub fn new(
        producer: Arc<dyn BrokerProducer>,
        breaker: CircuitBreaker,
        metrics: Arc<Metrics>,
        republish: RepublishQueue,
    ) -> Self {
        Self {
            producer,
            breaker,
            metrics,
            republish,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// One direct send attempt, with metrics and logging but no routing of
    /// the failure.
    pub async fn try_publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let event_type = event.event_type().as_str();

        match send_through_breaker(self.producer.as_ref(), &self.breaker, event).await {
            Ok(elapsed) => {
                self.metrics.record_published(event_type, elapsed.as_secs_f64());
                tracing::info!(
                    event_id = %event.event_id(),
                    event_type = %event_type,
                    correlation_id = %event.correlation_id(),
                    topic = %event.topic(),
                    partition_key = %event.aggregate_id(),
                    "Published event"
                );
                Ok(())
            }
            Err(e @ PublishError::CircuitOpen(_)) => {
                self.metrics.record_short_circuit(event_type);
                tracing::warn!(
                    event_id = %event.event_id(),
                    correlation_id = %event.correlation_id(),
                    breaker = %self.breaker.name(),
                    "Circuit open, publication short-circuited"
                );
                Err(e)
            }
            Err(e) => {
                self.metrics.record_publish_failure(event_type, e.reason());
                tracing::error!(
                    event_id = %event.event_id(),
                    correlation_id = %event.correlation_id(),
                    topic = %event.topic(),
                    error = %e,
                    "Failed to publish event"
                );
                Err(e)
            }
        }
    }

    async fn route_failure(&self, event: &DomainEvent, error: &PublishError) -> FailureRoute {
        let attempt = PublicationAttempt::first_failure(
            event.clone(),
            self.breaker.current_phase(),
            error.to_string(),
        );
        if error.is_transient() {
            self.republish.enqueue(attempt).await
        } else {
            self.republish.dead_letter(&attempt, "permanent publication error").await
        }
    }
}

#[async_trait]
impl EventPublisher for DurablePublisher {
    async fn publish(&self, event: &DomainEvent) -> PublishOutcome {
        if self.republish.has_pending(event.aggregate_id()) {
            tracing::debug!(
                event_id = %event.event_id(),
                aggregate_id = %event.aggregate_id(),
                "Earlier events of this order are still pending, queueing behind them"
            );
            let attempt = PublicationAttempt {
                attempt: 0,
                last_error: "queued behind pending events".to_string(),
                ..PublicationAttempt::first_failure(
                    event.clone(),
                    self.breaker.current_phase(),
                    String::new(),
                )
            };
            let route = self.republish.enqueue(attempt).await;
            return PublishOutcome::Deferred { route };
        }

        match self.try_publish(event).await {
            Ok(()) => PublishOutcome::Delivered,
            Err(e @ PublishError::CircuitOpen(_)) => PublishOutcome::ShortCircuited {
                route: self.route_failure(event, &e).await,
            },
            Err(e) => PublishOutcome::Failed {
                route: self.route_failure(event, &e).await,
            },
        }
    }

    fn mode(&self) -> PublisherMode {
        PublisherMode::Durable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::events::{deserialize_event, EventType};
    use crate::messaging::{republish_channel, DeliverySource, InMemoryBroker, RepublishConfig, RepublishWorker};
    use crate::storage::InMemoryDeadLetterStore;
    use crate::utils::{CircuitBreakerConfig, CircuitPhase, RetryPolicy};
    use serde_json::json;
    use uuid::Uuid;

    struct Harness {
        broker: InMemoryBroker,
        metrics: Arc<Metrics>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
        publisher: DurablePublisher,
        worker: Option<RepublishWorker>,
    }

    fn harness(breaker_config: CircuitBreakerConfig, republish: RepublishConfig) -> Harness {
        let broker = InMemoryBroker::new(3);
        let metrics = Arc::new(Metrics::new().unwrap());
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let breaker = CircuitBreaker::new("broker-publisher", breaker_config);
        let producer: Arc<dyn BrokerProducer> = Arc::new(broker.clone());

        let (queue, worker) = republish_channel(
            republish,
            producer.clone(),
            breaker.clone(),
            dead_letters.clone(),
            metrics.clone(),
        );
        let publisher = DurablePublisher::new(producer, breaker, metrics.clone(), queue);

        Harness {
            broker,
            metrics,
            dead_letters,
            publisher,
            worker: Some(worker),
        }
    }

    fn lenient_breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            minimum_calls: 100,
            sliding_window_size: 100,
            ..CircuitBreakerConfig::default()
        }
    }

    fn event(event_type: EventType, order_id: Uuid) -> DomainEvent {
        DomainEvent::new(event_type, order_id, json!({}), CorrelationId::new())
    }

    #[tokio::test]
    async fn test_publish_success_counts_and_uses_partition_key() {
        let h = harness(lenient_breaker(), RepublishConfig::default());
        let order_id = Uuid::new_v4();
        let created = event(EventType::OrderCreated, order_id);

        let outcome = h.publisher.publish(&created).await;

        assert_eq!(outcome, PublishOutcome::Delivered);
        assert_eq!(
            h.metrics.events_published.with_label_values(&["OrderCreated"]).get(),
            1
        );
        let stored = h.broker.payloads("order.created");
        assert_eq!(deserialize_event(&stored[0]).unwrap(), created);
    }

    #[tokio::test]
    async fn test_unreachable_broker_counts_one_failure_and_queues() {
        let h = harness(lenient_breaker(), RepublishConfig::default());
        h.broker.set_available(false);
        let created = event(EventType::OrderCreated, Uuid::new_v4());

        let outcome = h.publisher.publish(&created).await;

        assert_eq!(outcome, PublishOutcome::Failed { route: FailureRoute::Redelivery });
        assert_eq!(
            h.metrics
                .events_publish_failed
                .with_label_values(&["OrderCreated", "broker"])
                .get(),
            1
        );
        assert_eq!(h.metrics.republish_queue_depth.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_short_circuits_without_calling_broker() {
        let config = CircuitBreakerConfig {
            minimum_calls: 2,
            sliding_window_size: 2,
            wait_duration_in_open_state: Duration::from_secs(30),
            ..CircuitBreakerConfig::default()
        };
        let h = harness(config, RepublishConfig::default());
        h.broker.set_available(false);

        for _ in 0..2 {
            let _ = h.publisher.try_publish(&event(EventType::OrderCreated, Uuid::new_v4())).await;
        }
        assert_eq!(h.publisher.breaker().current_phase(), CircuitPhase::Open);
        let calls_before = h.broker.send_attempts();

        for _ in 0..5 {
            let result = h
                .publisher
                .try_publish(&event(EventType::OrderPaid, Uuid::new_v4()))
                .await;
            assert!(matches!(result, Err(PublishError::CircuitOpen(_))));
        }

        assert_eq!(h.broker.send_attempts(), calls_before);
        assert_eq!(h.publisher.breaker().current_phase(), CircuitPhase::Open);
        assert_eq!(
            h.metrics.events_short_circuited.with_label_values(&["OrderPaid"]).get(),
            5
        );

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(h.publisher.breaker().current_phase(), CircuitPhase::HalfOpen);
    }

    #[tokio::test]
    async fn test_short_circuited_publish_is_routed_not_raised() {
        let config = CircuitBreakerConfig {
            minimum_calls: 1,
            sliding_window_size: 1,
            ..CircuitBreakerConfig::default()
        };
        let h = harness(config, RepublishConfig::default());
        h.broker.set_available(false);
        let _ = h.publisher.publish(&event(EventType::OrderCreated, Uuid::new_v4())).await;

        let outcome = h.publisher.publish(&event(EventType::OrderCreated, Uuid::new_v4())).await;

        assert_eq!(
            outcome,
            PublishOutcome::ShortCircuited { route: FailureRoute::Redelivery }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_events_keep_their_order_after_recovery() {
        let mut h = harness(lenient_breaker(), RepublishConfig::default());
        let order_id = Uuid::new_v4();
        let created = event(EventType::OrderCreated, order_id);
        let paid = event(EventType::OrderPaid, order_id);

        h.broker.set_available(false);
        let first = h.publisher.publish(&created).await;
        h.broker.set_available(true);
        let second = h.publisher.publish(&paid).await;

        assert_eq!(first, PublishOutcome::Failed { route: FailureRoute::Redelivery });
        assert_eq!(second, PublishOutcome::Deferred { route: FailureRoute::Redelivery });
        // The newer event did not overtake the pending one
        assert!(h.broker.payloads("order.paid").is_empty());
        assert_eq!(h.publisher.republish.pending_aggregates(), 1);

        let worker = h.worker.take().unwrap().spawn();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut subscription = h.broker.subscribe("audit", &["order.created", "order.paid"]);
        let mut seen = Vec::new();
        while let Some(delivery) = subscription.poll().await.unwrap() {
            seen.push(deserialize_event(&delivery.payload).unwrap().event_id());
            subscription.ack(&delivery).await.unwrap();
        }
        assert_eq!(seen, vec![created.event_id(), paid.event_id()]);
        assert_eq!(h.publisher.republish.pending_aggregates(), 0);

        drop(h.publisher);
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_republication_is_dead_lettered() {
        let republish = RepublishConfig {
            policy: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            ..RepublishConfig::default()
        };
        let mut h = harness(lenient_breaker(), republish);
        h.broker.set_available(false);
        let created = event(EventType::OrderCreated, Uuid::new_v4());

        let _ = h.publisher.publish(&created).await;
        let worker = h.worker.take().unwrap().spawn();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let records = h.dead_letters.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, created.event_id());
        assert_eq!(records[0].failure_count, 3);
        // initial send plus two re-publication attempts
        assert_eq!(h.broker.send_attempts(), 3);

        drop(h.publisher);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_dead_letters_immediately() {
        let republish = RepublishConfig {
            capacity: 1,
            ..RepublishConfig::default()
        };
        let h = harness(lenient_breaker(), republish);
        h.broker.set_available(false);

        let first = h.publisher.publish(&event(EventType::OrderCreated, Uuid::new_v4())).await;
        let second = h.publisher.publish(&event(EventType::OrderCreated, Uuid::new_v4())).await;

        assert_eq!(first, PublishOutcome::Failed { route: FailureRoute::Redelivery });
        assert_eq!(second, PublishOutcome::Failed { route: FailureRoute::DeadLetter });
        assert_eq!(h.dead_letters.records().len(), 1);
    }
}
