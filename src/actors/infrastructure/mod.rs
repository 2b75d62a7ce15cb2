// ============================================================================
// Infrastructure Actors
// ============================================================================

mod health_monitor;

pub use health_monitor::{
    GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth, COMPONENT_CONSUMER,
    COMPONENT_DATABASE, COMPONENT_RELAY, COMPONENT_TRANSPORT,
};
