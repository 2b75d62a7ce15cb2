// ============================================================================
// Core Actor Types
// ============================================================================

mod health;

pub use health::{ComponentHealth, HealthStatus};
