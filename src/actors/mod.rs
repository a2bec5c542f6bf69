// ============================================================================
// Actors Module
// ============================================================================
//
// kameo actors for infrastructure concerns.
//
// Structure:
// - core/           - Shared types (HealthStatus, ComponentHealth)
// - infrastructure/ - Concrete actors (DLQ, Health)
//
// Note: Order logic runs in OrderService, NOT in actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

mod core;
mod infrastructure;

pub use self::core::{ComponentHealth, HealthStatus};
pub use infrastructure::{
    AddToDlq, DlqActor, DlqHandle, GetDlqMessages, GetDlqStats, GetSystemHealth,
    HealthMonitorActor, PollBreakers, SystemHealth, UpdateHealth,
};
