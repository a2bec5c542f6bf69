use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use super::broker::BrokerProducer;
use super::durable::send_through_breaker;
use super::FailureRoute;
use crate::errors::{IsTransient, PublishError};
use crate::events::PublicationAttempt;
use crate::metrics::Metrics;
use crate::storage::{DeadLetterOrigin, DeadLetterRecord, DeadLetterSink};
use crate::utils::{CircuitBreaker, CircuitPhase, RetryPolicy};

// ============================================================================
// Best-Effort Re-Publication
// ============================================================================
//
// Events the durable publisher could not hand to the broker wait here. A
// single worker drains the bounded queue in FIFO order and retries the head
// item in place with exponential backoff, so one order's events reach the
// broker in emission order.
//
// - Circuit open: the worker waits for the breaker to probe again without
//   spending attempts
// - Budget spent, permanent broker error, or queue full: dead-letter path
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RepublishConfig {
    /// Queue slots; a full queue sends new failures straight to the dead-letter path
    pub capacity: usize,
    /// Backoff between attempts; `max_attempts` bounds attempts per event
    pub policy: RetryPolicy,
    /// How often to re-check an open circuit
    pub open_circuit_poll: Duration,
}

impl Default for RepublishConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            policy: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            open_circuit_poll: Duration::from_secs(1),
        }
    }
}

struct RepublishShared {
    /// Queued events per aggregate
    pending: Mutex<HashMap<Uuid, usize>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<Metrics>,
}

impl RepublishShared {
    fn reserve(&self, aggregate_id: Uuid) {
        *self.pending.lock().entry(aggregate_id).or_insert(0) += 1;
    }

    fn release(&self, aggregate_id: Uuid) {
        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(&aggregate_id) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&aggregate_id);
            }
        }
    }

    async fn dead_letter(&self, attempt: &PublicationAttempt, reason: &str) {
        let event = &attempt.event;
        let record = DeadLetterRecord::from_event(
            event,
            format!("{}: {}", reason, attempt.last_error),
            attempt.attempt,
            attempt.first_failed_at,
            DeadLetterOrigin::Publisher,
        );

        tracing::error!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            aggregate_id = %event.aggregate_id(),
            correlation_id = %event.correlation_id(),
            attempts = attempt.attempt,
            reason,
            "Giving up on publication, routing event to dead-letter"
        );

        if let Err(e) = self.dead_letters.dead_letter(record).await {
            tracing::error!(
                event_id = %event.event_id(),
                error = %e,
                "Dead-letter sink failed, event dropped"
            );
        }
    }
}

/// Producer side of the re-publication queue.
#[derive(Clone)]
pub struct RepublishQueue {
    sender: mpsc::Sender<PublicationAttempt>,
    shared: Arc<RepublishShared>,
}

impl RepublishQueue {
    /// Whether events of this aggregate are still waiting for the broker.
    pub fn has_pending(&self, aggregate_id: Uuid) -> bool {
        self.shared.pending.lock().contains_key(&aggregate_id)
    }

    /// Aggregates with at least one event waiting for the broker.
    pub fn pending_aggregates(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub async fn enqueue(&self, attempt: PublicationAttempt) -> FailureRoute {
        let aggregate_id = attempt.event.aggregate_id();
        self.shared.reserve(aggregate_id);

        match self.sender.try_send(attempt) {
            Ok(()) => {
                self.shared.metrics.record_republish_queued();
                FailureRoute::Redelivery
            }
            Err(mpsc::error::TrySendError::Full(attempt))
            | Err(mpsc::error::TrySendError::Closed(attempt)) => {
                self.shared.release(aggregate_id);
                self.shared
                    .dead_letter(&attempt, "re-publication queue unavailable")
                    .await;
                FailureRoute::DeadLetter
            }
        }
    }

    pub async fn dead_letter(&self, attempt: &PublicationAttempt, reason: &str) -> FailureRoute {
        self.shared.dead_letter(attempt, reason).await;
        FailureRoute::DeadLetter
    }
}

pub struct RepublishWorker {
    receiver: mpsc::Receiver<PublicationAttempt>,
    shared: Arc<RepublishShared>,
    producer: Arc<dyn BrokerProducer>,
    breaker: CircuitBreaker,
    config: RepublishConfig,
}

/// Create the queue and the worker that drains it.
pub fn republish_channel(
    config: RepublishConfig,
    producer: Arc<dyn BrokerProducer>,
    breaker: CircuitBreaker,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<Metrics>,
) -> (RepublishQueue, RepublishWorker) {
    let (sender, receiver) = mpsc::channel(config.capacity.max(1));
    let shared = Arc::new(RepublishShared {
        pending: Mutex::new(HashMap::new()),
        dead_letters,
        metrics,
    });

    let queue = RepublishQueue {
        sender,
        shared: shared.clone(),
    };
    let worker = RepublishWorker {
        receiver,
        shared,
        producer,
        breaker,
        config,
    };
    (queue, worker)
}

impl RepublishWorker {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until every `RepublishQueue` handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(breaker = %self.breaker.name(), "Re-publication worker started");
        while let Some(attempt) = self.receiver.recv().await {
            self.shared.metrics.record_republish_dequeued();
            let aggregate_id = attempt.event.aggregate_id();
            self.process(attempt).await;
            self.shared.release(aggregate_id);
        }
        tracing::info!("Re-publication worker stopped");
    }

    async fn process(&self, mut attempt: PublicationAttempt) {
        let max_attempts = self.config.policy.max_attempts.max(1);
        let event_type = attempt.event.event_type().as_str();

        // Attempt 0 was queued behind another event and has not failed yet
        let mut delay = if attempt.attempt == 0 {
            Duration::ZERO
        } else {
            self.config.policy.delay_after(attempt.attempt)
        };

        loop {
            if self.breaker.current_phase() == CircuitPhase::Open {
                sleep(self.config.open_circuit_poll).await;
                continue;
            }
            sleep(delay).await;

            match send_through_breaker(self.producer.as_ref(), &self.breaker, &attempt.event).await {
                Ok(elapsed) => {
                    self.shared
                        .metrics
                        .record_published(event_type, elapsed.as_secs_f64());
                    tracing::info!(
                        event_id = %attempt.event.event_id(),
                        correlation_id = %attempt.event.correlation_id(),
                        topic = %attempt.event.topic(),
                        previous_failures = attempt.attempt,
                        "Re-published event"
                    );
                    return;
                }
                Err(PublishError::CircuitOpen(_)) => {
                    // Lost the race for a half-open trial slot; not an attempt
                    delay = self.config.open_circuit_poll;
                    continue;
                }
                Err(e) => {
                    self.shared.metrics.record_publish_failure(event_type, e.reason());
                    attempt.failed_again(self.breaker.current_phase(), e.to_string());

                    if !e.is_transient() {
                        self.shared.dead_letter(&attempt, "permanent broker error").await;
                        return;
                    }
                    if attempt.attempt >= max_attempts {
                        self.shared
                            .dead_letter(&attempt, "re-publication attempts exhausted")
                            .await;
                        return;
                    }

                    delay = self.config.policy.delay_after(attempt.attempt);
                    tracing::warn!(
                        event_id = %attempt.event.event_id(),
                        attempt = attempt.attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Re-publication failed, retrying after delay"
                    );
                }
            }
        }
    }
}
