use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Health Check Types
// ============================================================================
//
// Shared vocabulary between the components that report health (relay
// scheduler, transport breaker watcher, consumer) and the monitor actor that
// aggregates it for `/health`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    #[serde(flatten)]
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_health_serializes_flat() {
        let health = ComponentHealth::new("transport", HealthStatus::Degraded("half-open".into()))
            .with_details("probing broker");

        let json = serde_json::to_value(&health).unwrap();

        assert_eq!(json["name"], "transport");
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["reason"], "half-open");
        assert_eq!(json["details"], "probing broker");
    }

    #[test]
    fn test_healthy_has_no_reason() {
        let json = serde_json::to_value(ComponentHealth::new("relay", HealthStatus::Healthy)).unwrap();

        assert_eq!(json["status"], "healthy");
        assert!(json.get("reason").is_none());
        assert!(json.get("details").is_none());
    }
}
