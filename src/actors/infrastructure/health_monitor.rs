use chrono::Utc;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::{ComponentHealth, HealthStatus};
use crate::utils::CircuitBreakerRegistry;

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Poll every registered circuit breaker on an interval
// - Accept health reports pushed by other components
// - Aggregate system-wide health for the /health endpoint
//
// ============================================================================

const POLL_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

/// Re-read every breaker phase right away.
#[derive(Debug)]
pub struct PollBreakers;

#[derive(Debug)]
pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

// Implement Reply for SystemHealth to use it as a message reply type
impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    breakers: Arc<CircuitBreakerRegistry>,
    poll_interval: Duration,
}

impl HealthMonitorActor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            components: HashMap::new(),
            breakers,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn poll_breakers(&mut self) {
        for breaker in self.breakers.all() {
            let snapshot = breaker.snapshot();
            let health = ComponentHealth::new(
                format!("circuit_breaker:{}", snapshot.name),
                HealthStatus::from(snapshot.phase),
            )
            .with_details(format!(
                "failure_rate={:.1}% slow_call_rate={:.1}% buffered_calls={}",
                snapshot.failure_rate, snapshot.slow_call_rate, snapshot.buffered_calls
            ));
            self.components.insert(health.name.clone(), health);
        }
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(_) => {
                    has_degraded = true;
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            unhealthy_components.sort();
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(mut state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("HealthMonitorActor started");
        state.poll_breakers();

        let poll_interval = state.poll_interval;
        let weak_ref = actor_ref.downgrade();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(actor_ref) = weak_ref.upgrade() else {
                    break;
                };
                if actor_ref.tell(PollBreakers).send().await.is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let mut health = ComponentHealth::new(msg.component.clone(), msg.status.clone());
        health.details = msg.details;

        tracing::debug!(
            component = %msg.component,
            status = ?msg.status,
            "Updated component health"
        );

        self.components.insert(msg.component, health);
    }
}

impl Message<PollBreakers> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, _msg: PollBreakers, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.poll_breakers();
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::CircuitBreakerConfig;
    use kameo::prelude::*;

    #[tokio::test]
    async fn test_open_breaker_makes_system_unhealthy() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let breaker = registry.get_or_create(
            "broker-publisher",
            CircuitBreakerConfig {
                minimum_calls: 1,
                sliding_window_size: 1,
                ..CircuitBreakerConfig::default()
            },
        );

        let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new(registry.clone()));
        let health = monitor.ask(GetSystemHealth).send().await.unwrap();
        assert!(health.overall_status.is_healthy());

        let _ = breaker
            .call(async { Err::<(), _>("broker down") })
            .await;
        monitor.tell(PollBreakers).send().await.unwrap();

        let health = monitor.ask(GetSystemHealth).send().await.unwrap();
        assert!(health.overall_status.is_unhealthy());
        assert!(health.components.contains_key("circuit_breaker:broker-publisher"));
    }

    #[tokio::test]
    async fn test_reported_degradation_is_aggregated() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new(registry));

        monitor
            .tell(UpdateHealth {
                component: "consumer".to_string(),
                status: HealthStatus::Degraded("lagging".to_string()),
                details: None,
            })
            .send()
            .await
            .unwrap();

        let health = monitor.ask(GetSystemHealth).send().await.unwrap();
        assert_eq!(
            health.overall_status,
            HealthStatus::Degraded("Some components degraded".to_string())
        );
    }
}
