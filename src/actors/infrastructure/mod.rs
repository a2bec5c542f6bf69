// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// Reusable infrastructure actors for system concerns:
// - Dead letter queue
// - Health monitoring
//
// ============================================================================

mod dlq;
mod health_monitor;

pub use dlq::{AddToDlq, DlqActor, DlqHandle, GetDlqMessages, GetDlqStats};
pub use health_monitor::{
    GetSystemHealth, HealthMonitorActor, PollBreakers, SystemHealth, UpdateHealth,
};
