//! Application configuration loaded from environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::consumer::ConsumerConfig;
use crate::messaging::{PublisherMode, RepublishConfig};
use crate::utils::{CircuitBreakerConfig, RetryPolicy};

/// Everything the binary needs to wire the system.
///
/// Unset variables fall back to defaults; malformed values are an error
/// rather than being silently replaced.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub publisher_mode: PublisherMode,
    pub kafka_brokers: String,
    pub kafka_send_timeout: Duration,
    pub broker_partitions: usize,
    pub scylla_node: Option<String>,
    pub scylla_keyspace: String,
    pub redis_url: Option<String>,
    pub dedup_retention: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub consumer: ConsumerConfig,
    pub republish: RepublishConfig,
    pub metrics_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            publisher_mode: PublisherMode::InProcess,
            kafka_brokers: "127.0.0.1:9092".to_string(),
            kafka_send_timeout: Duration::from_millis(5000),
            broker_partitions: 3,
            scylla_node: None,
            scylla_keyspace: "orders_ks".to_string(),
            redis_url: None,
            dedup_retention: Duration::from_secs(604_800),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            consumer: ConsumerConfig::default(),
            republish: RepublishConfig::default(),
            metrics_port: 9090,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let cb = &defaults.circuit_breaker;
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let circuit_breaker = CircuitBreakerConfig {
            failure_rate_threshold: parse_or(&var, "CB_FAILURE_RATE_THRESHOLD", cb.failure_rate_threshold)?,
            slow_call_rate_threshold: parse_or(&var, "CB_SLOW_CALL_RATE_THRESHOLD", cb.slow_call_rate_threshold)?,
            slow_call_duration_threshold: millis_or(&var, "CB_SLOW_CALL_DURATION_MS", cb.slow_call_duration_threshold)?,
            wait_duration_in_open_state: millis_or(&var, "CB_WAIT_DURATION_OPEN_MS", cb.wait_duration_in_open_state)?,
            permitted_calls_in_half_open: parse_or(&var, "CB_PERMITTED_CALLS_HALF_OPEN", cb.permitted_calls_in_half_open)?,
            minimum_calls: parse_or(&var, "CB_MINIMUM_CALLS", cb.minimum_calls)?,
            sliding_window_size: parse_or(&var, "CB_SLIDING_WINDOW_SIZE", cb.sliding_window_size)?,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&var, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            initial_delay: millis_or(&var, "RETRY_INITIAL_DELAY_MS", defaults.retry.initial_delay)?,
            multiplier: parse_or(&var, "RETRY_MULTIPLIER", defaults.retry.multiplier)?,
            ..defaults.retry.clone()
        };

        let consumer = ConsumerConfig {
            consumer_group: var("KAFKA_CONSUMER_GROUP").unwrap_or(defaults.consumer.consumer_group.clone()),
            max_failed_deliveries: parse_or(&var, "CONSUMER_MAX_REDELIVERIES", defaults.consumer.max_failed_deliveries)?,
            failure_ttl: Duration::from_secs(parse_or(
                &var,
                "CONSUMER_FAILURE_TTL_SECS",
                defaults.consumer.failure_ttl.as_secs(),
            )?),
            ..defaults.consumer.clone()
        };

        let republish = RepublishConfig {
            capacity: parse_or(&var, "REPUBLISH_QUEUE_CAPACITY", defaults.republish.capacity)?,
            policy: RetryPolicy {
                max_attempts: parse_or(&var, "REPUBLISH_MAX_ATTEMPTS", defaults.republish.policy.max_attempts)?,
                ..retry.clone()
            },
            ..defaults.republish.clone()
        };

        let config = Self {
            publisher_mode: parse_or(&var, "PUBLISHER_MODE", defaults.publisher_mode)?,
            kafka_brokers: var("KAFKA_BROKERS").unwrap_or(defaults.kafka_brokers.clone()),
            kafka_send_timeout: millis_or(&var, "KAFKA_SEND_TIMEOUT_MS", defaults.kafka_send_timeout)?,
            broker_partitions: parse_or(&var, "BROKER_PARTITIONS", defaults.broker_partitions)?,
            scylla_node: var("SCYLLA_NODE"),
            scylla_keyspace: var("SCYLLA_KEYSPACE").unwrap_or(defaults.scylla_keyspace.clone()),
            redis_url: var("REDIS_URL"),
            dedup_retention: Duration::from_secs(parse_or(
                &var,
                "DEDUP_RETENTION_SECS",
                defaults.dedup_retention.as_secs(),
            )?),
            circuit_breaker,
            retry,
            consumer,
            republish,
            metrics_port: parse_or(&var, "METRICS_PORT", defaults.metrics_port)?,
        };

        if config.broker_partitions == 0 {
            anyhow::bail!("BROKER_PARTITIONS must be at least 1");
        }
        if config.consumer.max_failed_deliveries == 0 {
            anyhow::bail!("CONSUMER_MAX_REDELIVERIES must be at least 1");
        }

        Ok(config)
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}

fn millis_or<F>(var: &F, key: &str, default: Duration) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let millis = parse_or(var, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.publisher_mode, PublisherMode::InProcess);
        assert_eq!(config.kafka_brokers, "127.0.0.1:9092");
        assert_eq!(config.consumer.max_failed_deliveries, 5);
        assert_eq!(config.consumer.consumer_group, "order-notifications");
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.republish.policy.max_attempts, 5);
        assert_eq!(config.metrics_port, 9090);
        assert!(config.scylla_node.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PUBLISHER_MODE", "durable"),
            ("CB_WAIT_DURATION_OPEN_MS", "1500"),
            ("RETRY_MAX_ATTEMPTS", "4"),
            ("CONSUMER_MAX_REDELIVERIES", "2"),
            ("CONSUMER_FAILURE_TTL_SECS", "60"),
            ("SCYLLA_NODE", "10.0.0.5:9042"),
        ])
        .unwrap();

        assert_eq!(config.publisher_mode, PublisherMode::Durable);
        assert_eq!(config.circuit_breaker.wait_duration_in_open_state, Duration::from_millis(1500));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.consumer.max_failed_deliveries, 2);
        assert_eq!(config.consumer.failure_ttl, Duration::from_secs(60));
        assert_eq!(config.scylla_node.as_deref(), Some("10.0.0.5:9042"));
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let err = load(&[("METRICS_PORT", "ninety")]).unwrap_err();
        assert!(err.to_string().contains("METRICS_PORT"));

        assert!(load(&[("BROKER_PARTITIONS", "0")]).is_err());
    }
}
