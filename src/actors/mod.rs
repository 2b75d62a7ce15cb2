// ============================================================================
// Actors Module
// ============================================================================
//
// Actors are reserved for infrastructure concerns. The relay itself is a plain
// struct driven by a scheduler task; only health aggregation is an actor.
//
// Structure:
// - core/           - Health vocabulary shared by reporters and the monitor
// - infrastructure/ - The health monitor actor
//
// ============================================================================

mod core;
mod infrastructure;

pub use core::{ComponentHealth, HealthStatus};
pub use infrastructure::{
    GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth, COMPONENT_CONSUMER,
    COMPONENT_DATABASE, COMPONENT_RELAY, COMPONENT_TRANSPORT,
};
