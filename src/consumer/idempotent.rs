use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::notifier::NotificationSender;
use crate::correlation::correlation_span;
use crate::events::{deserialize_event, DomainEvent};
use crate::messaging::Delivery;
use crate::metrics::Metrics;
use crate::storage::{DeadLetterOrigin, DeadLetterRecord, DeadLetterSink, ProcessedEventStore};

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub consumer_group: String,
    /// Failed deliveries of one event before it is dead-lettered; the
    /// delivery that fails for the n-th time is the one dead-lettered.
    pub max_failed_deliveries: u32,
    /// How long a failure count survives without a new failure. Counts for
    /// events that went to another consumer are forgotten after this.
    pub failure_ttl: Duration,
    /// Wait when the source has nothing to deliver.
    pub idle_poll_interval: Duration,
    /// Wait after a nack before polling again.
    pub redelivery_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_group: "order-notifications".to_string(),
            max_failed_deliveries: 5,
            failure_ttl: Duration::from_secs(3600),
            idle_poll_interval: Duration::from_millis(200),
            redelivery_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    Processed,
    Duplicate,
    DeadLettered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerDecision {
    Ack(AckReason),
    Nack,
}

impl ConsumerDecision {
    /// Label used for the `decision` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            ConsumerDecision::Ack(AckReason::Processed) => "processed",
            ConsumerDecision::Ack(AckReason::Duplicate) => "duplicate",
            ConsumerDecision::Ack(AckReason::DeadLettered) => "dead_lettered",
            ConsumerDecision::Nack => "nack",
        }
    }
}

struct FailureTrack {
    count: u32,
    first_failed_at: DateTime<Utc>,
    last_failed: Instant,
}

pub struct IdempotentConsumer {
    config: ConsumerConfig,
    processed: Arc<dyn ProcessedEventStore>,
    notifier: Arc<dyn NotificationSender>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<Metrics>,
    failures: Mutex<HashMap<Uuid, FailureTrack>>,
}

impl IdempotentConsumer {
    pub fn new(
        config: ConsumerConfig,
        processed: Arc<dyn ProcessedEventStore>,
        notifier: Arc<dyn NotificationSender>,
        dead_letters: Arc<dyn DeadLetterSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        if !processed.is_durable() {
            tracing::warn!(
                consumer_group = %config.consumer_group,
                "Processed-event store is not durable, duplicates after a restart will not be detected"
            );
        }

        Self {
            config,
            processed,
            notifier,
            dead_letters,
            metrics,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Events with a live failure count.
    pub fn tracked_failures(&self) -> usize {
        self.failures.lock().len()
    }

    /// Decode a broker delivery and decide what to do with it.
    ///
    /// Payloads that do not decode are dead-lettered: redelivering them cannot
    /// help.
    pub async fn on_delivery(&self, delivery: &Delivery) -> ConsumerDecision {
        match deserialize_event(&delivery.payload) {
            Ok(event) => self.on_event(&event).await,
            Err(e) => {
                let record = DeadLetterRecord::undecodable(&delivery.topic, &delivery.payload, e.to_string());
                let decision = match self.dead_letters.dead_letter(record).await {
                    Ok(()) => {
                        tracing::error!(
                            topic = %delivery.topic,
                            partition = delivery.partition,
                            offset = delivery.offset,
                            error = %e,
                            "Undecodable delivery moved to dead letter queue"
                        );
                        ConsumerDecision::Ack(AckReason::DeadLettered)
                    }
                    Err(dlq_error) => {
                        tracing::warn!(
                            topic = %delivery.topic,
                            offset = delivery.offset,
                            error = %dlq_error,
                            "Failed to dead-letter undecodable delivery"
                        );
                        ConsumerDecision::Nack
                    }
                };
                self.metrics.record_consumer_decision(decision.label());
                decision
            }
        }
    }

    /// Apply the dedup check and the side effect to one event.
    pub async fn on_event(&self, event: &DomainEvent) -> ConsumerDecision {
        let decision = self
            .decide(event)
            .instrument(correlation_span(event.correlation_id()))
            .await;
        self.metrics.record_consumer_decision(decision.label());
        decision
    }

    async fn decide(&self, event: &DomainEvent) -> ConsumerDecision {
        let event_id = event.event_id();

        match self.processed.is_processed(event_id).await {
            Ok(true) => {
                tracing::debug!(
                    event_id = %event_id,
                    event_type = %event.event_type(),
                    correlation_id = %event.correlation_id(),
                    "Duplicate delivery, already processed"
                );
                return ConsumerDecision::Ack(AckReason::Duplicate);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    event_id = %event_id,
                    error = %e,
                    "Processed-event lookup failed, requesting redelivery"
                );
                return ConsumerDecision::Nack;
            }
        }

        let started = Instant::now();
        match self.notifier.notify(event).await {
            Ok(()) => {
                if let Err(e) = self.processed.mark_processed(event_id, Utc::now()).await {
                    tracing::warn!(
                        event_id = %event_id,
                        error = %e,
                        "Side effect ran but the processed mark was not written"
                    );
                }
                self.failures.lock().remove(&event_id);
                self.metrics.record_consumer_processing(
                    event.event_type().as_str(),
                    started.elapsed().as_secs_f64(),
                );

                tracing::info!(
                    event_id = %event_id,
                    event_type = %event.event_type(),
                    order_id = %event.aggregate_id(),
                    correlation_id = %event.correlation_id(),
                    consumer_group = %self.config.consumer_group,
                    "Event processed"
                );
                ConsumerDecision::Ack(AckReason::Processed)
            }
            Err(e) => self.on_side_effect_failure(event, e).await,
        }
    }

    async fn on_side_effect_failure(&self, event: &DomainEvent, error: anyhow::Error) -> ConsumerDecision {
        let event_id = event.event_id();
        let (count, first_failed_at) = {
            let now = Instant::now();
            let ttl = self.config.failure_ttl;
            let mut failures = self.failures.lock();
            failures.retain(|_, track| now.duration_since(track.last_failed) < ttl);

            let track = failures.entry(event_id).or_insert_with(|| FailureTrack {
                count: 0,
                first_failed_at: Utc::now(),
                last_failed: now,
            });
            track.count += 1;
            track.last_failed = now;
            (track.count, track.first_failed_at)
        };

        if count < self.config.max_failed_deliveries {
            tracing::warn!(
                event_id = %event_id,
                event_type = %event.event_type(),
                correlation_id = %event.correlation_id(),
                failures = count,
                max_failed_deliveries = self.config.max_failed_deliveries,
                error = %error,
                "Side effect failed, requesting redelivery"
            );
            return ConsumerDecision::Nack;
        }

        let record = DeadLetterRecord::from_event(
            event,
            error.to_string(),
            count,
            first_failed_at,
            DeadLetterOrigin::Consumer,
        );
        match self.dead_letters.dead_letter(record).await {
            Ok(()) => {
                self.failures.lock().remove(&event_id);
                // Redeliveries of a dead-lettered event are acked as duplicates
                // instead of producing another record
                if let Err(e) = self.processed.mark_processed(event_id, Utc::now()).await {
                    tracing::warn!(
                        event_id = %event_id,
                        error = %e,
                        "Dead-lettered event was not marked as handled"
                    );
                }
                tracing::error!(
                    event_id = %event_id,
                    event_type = %event.event_type(),
                    correlation_id = %event.correlation_id(),
                    failures = count,
                    error = %error,
                    "Redelivery limit reached, event moved to dead letter queue"
                );
                ConsumerDecision::Ack(AckReason::DeadLettered)
            }
            Err(dlq_error) => {
                tracing::warn!(
                    event_id = %event_id,
                    error = %dlq_error,
                    "Failed to dead-letter event, requesting redelivery"
                );
                ConsumerDecision::Nack
            }
        }
    }
}
