// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

use crate::utils::{CircuitPhase, RetryObserver, RetryOutcome, StateTransition, TransitionListener};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Write-only sink for:
// - Event publication (published, failed, short-circuited, latency)
// - Best-effort re-publication queue
// - Retry attempts and outcomes
// - Circuit breaker phases and transitions
// - Consumer dedup decisions
// - Dead Letter Queue statistics
//
// Nothing in the control flow reads these values back.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Publication Metrics
    pub events_published: IntCounterVec,
    pub events_publish_failed: IntCounterVec,
    pub events_short_circuited: IntCounterVec,
    pub publish_duration: HistogramVec,

    // Re-publication Metrics
    pub republish_queued: IntCounter,
    pub republish_queue_depth: IntGauge,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,
    pub retry_permanent_failure: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGaugeVec,
    pub circuit_breaker_transitions: IntCounterVec,

    // Consumer Metrics
    pub consumer_decisions: IntCounterVec,
    pub consumer_processing_duration: HistogramVec,

    // DLQ Metrics
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_event_type: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Publication Metrics
        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events accepted by the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let events_publish_failed = IntCounterVec::new(
            Opts::new("events_publish_failed_total", "Event publications the broker did not accept"),
            &["event_type", "reason"],
        )?;
        registry.register(Box::new(events_publish_failed.clone()))?;

        let events_short_circuited = IntCounterVec::new(
            Opts::new("events_short_circuited_total", "Event publications rejected by an open circuit"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_short_circuited.clone()))?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new("event_publish_duration_seconds", "Broker send latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        // Re-publication Metrics
        let republish_queued = IntCounter::new(
            "events_republish_queued_total",
            "Events queued for best-effort re-publication",
        )?;
        registry.register(Box::new(republish_queued.clone()))?;

        let republish_queue_depth = IntGauge::new(
            "republish_queue_depth",
            "Events currently waiting for re-publication",
        )?;
        registry.register(Box::new(republish_queue_depth.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Operations that eventually succeeded"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Total failed retries after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        let retry_permanent_failure = IntCounterVec::new(
            Opts::new("retry_permanent_failure_total", "Operations failed with a non-retryable error"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_permanent_failure.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["name"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["name", "from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        // Consumer Metrics
        let consumer_decisions = IntCounterVec::new(
            Opts::new("consumer_decisions_total", "Idempotent consumer decisions"),
            &["decision"],
        )?;
        registry.register(Box::new(consumer_decisions.clone()))?;

        let consumer_processing_duration = HistogramVec::new(
            HistogramOpts::new("consumer_processing_duration_seconds", "Side effect duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(consumer_processing_duration.clone()))?;

        // DLQ Metrics
        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total messages in dead letter queue",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_event_type = IntCounterVec::new(
            Opts::new("dlq_messages_by_event_type", "DLQ messages by event type"),
            &["event_type"],
        )?;
        registry.register(Box::new(dlq_messages_by_event_type.clone()))?;

        Ok(Self {
            registry,
            events_published,
            events_publish_failed,
            events_short_circuited,
            publish_duration,
            republish_queued,
            republish_queue_depth,
            retry_attempts_total,
            retry_success,
            retry_failure,
            retry_permanent_failure,
            circuit_breaker_state,
            circuit_breaker_transitions,
            consumer_decisions,
            consumer_processing_duration,
            dlq_messages_total,
            dlq_messages_by_event_type,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_published(&self, event_type: &str, duration_secs: f64) {
        self.events_published.with_label_values(&[event_type]).inc();
        self.publish_duration.with_label_values(&[event_type]).observe(duration_secs);
    }

    pub fn record_publish_failure(&self, event_type: &str, reason: &str) {
        self.events_publish_failed.with_label_values(&[event_type, reason]).inc();
    }

    pub fn record_short_circuit(&self, event_type: &str) {
        self.events_short_circuited.with_label_values(&[event_type]).inc();
    }

    pub fn record_republish_queued(&self) {
        self.republish_queued.inc();
        self.republish_queue_depth.inc();
    }

    pub fn record_republish_dequeued(&self) {
        self.republish_queue_depth.dec();
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        let attempt = attempt.to_string();
        self.retry_attempts_total.with_label_values(&[operation, attempt.as_str()]).inc();
    }

    pub fn record_consumer_decision(&self, decision: &str) {
        self.consumer_decisions.with_label_values(&[decision]).inc();
    }

    pub fn record_consumer_processing(&self, event_type: &str, duration_secs: f64) {
        self.consumer_processing_duration.with_label_values(&[event_type]).observe(duration_secs);
    }

    /// Helper to record DLQ message
    pub fn record_dlq_message(&self, event_type: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_event_type.with_label_values(&[event_type]).inc();
    }

    pub fn update_circuit_breaker_state(&self, name: &str, phase: CircuitPhase) {
        self.circuit_breaker_state.with_label_values(&[name]).set(phase.gauge_value());
    }
}

impl RetryObserver for Metrics {
    fn on_attempt(&self, operation: &str, attempt: u32) {
        self.record_retry_attempt(operation, attempt);
    }

    fn on_outcome(&self, operation: &str, outcome: RetryOutcome) {
        match outcome {
            RetryOutcome::Succeeded { .. } => self.retry_success.with_label_values(&[operation]).inc(),
            RetryOutcome::Exhausted { .. } => self.retry_failure.with_label_values(&[operation]).inc(),
            RetryOutcome::Permanent { .. } => {
                self.retry_permanent_failure.with_label_values(&[operation]).inc()
            }
        }
    }
}

impl TransitionListener for Metrics {
    fn on_transition(&self, transition: &StateTransition) {
        self.circuit_breaker_transitions
            .with_label_values(&[
                transition.name.as_str(),
                transition.from.as_str(),
                transition.to.as_str(),
            ])
            .inc();
        self.update_circuit_breaker_state(&transition.name, transition.to);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_published("OrderCreated", 0.01);
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_publication_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_published("OrderCreated", 0.05);
        metrics.record_publish_failure("OrderCreated", "broker");
        metrics.record_short_circuit("OrderPaid");

        assert_eq!(metrics.events_published.with_label_values(&["OrderCreated"]).get(), 1);
        assert_eq!(
            metrics.events_publish_failed.with_label_values(&["OrderCreated", "broker"]).get(),
            1
        );
        assert_eq!(metrics.events_short_circuited.with_label_values(&["OrderPaid"]).get(), 1);
    }

    #[test]
    fn test_retry_observer() {
        let metrics = Metrics::new().unwrap();
        metrics.on_attempt("save_order", 1);
        metrics.on_attempt("save_order", 2);
        metrics.on_outcome("save_order", RetryOutcome::Succeeded { attempts: 2 });

        assert_eq!(metrics.retry_attempts_total.with_label_values(&["save_order", "2"]).get(), 1);
        assert_eq!(metrics.retry_success.with_label_values(&["save_order"]).get(), 1);
    }

    #[test]
    fn test_record_dlq_message() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dlq_message("OrderCreated");
        metrics.record_dlq_message("OrderPaid");

        assert_eq!(metrics.dlq_messages_total.get(), 2);
    }

    #[test]
    fn test_transition_listener_tracks_phase_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.on_transition(&StateTransition {
            name: "broker-publisher".into(),
            from: CircuitPhase::Closed,
            to: CircuitPhase::Open,
            failure_rate: 60.0,
            slow_call_rate: 0.0,
        });

        assert_eq!(metrics.circuit_breaker_state.with_label_values(&["broker-publisher"]).get(), 1);
        assert_eq!(
            metrics
                .circuit_breaker_transitions
                .with_label_values(&["broker-publisher", "Closed", "Open"])
                .get(),
            1
        );
    }

    #[test]
    fn test_republish_queue_depth() {
        let metrics = Metrics::new().unwrap();
        metrics.record_republish_queued();
        metrics.record_republish_queued();
        metrics.record_republish_dequeued();

        assert_eq!(metrics.republish_queued.get(), 2);
        assert_eq!(metrics.republish_queue_depth.get(), 1);
    }
}
