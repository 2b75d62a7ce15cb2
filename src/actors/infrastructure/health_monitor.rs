use chrono::{DateTime, Utc};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::{Actor, Reply};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::{ComponentHealth, HealthStatus};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitState};

// ============================================================================
// Health Monitor Actor - Aggregates component health
// ============================================================================
//
// Responsibilities:
// - Collect health updates pushed by the relay scheduler and the consumer
// - Poll the transport circuit breaker and mirror it into the metrics gauge
// - Answer `/health` with an aggregated view
//
// Components: "database", "relay", "transport", "consumer"
//
// ============================================================================

pub const COMPONENT_DATABASE: &str = "database";
pub const COMPONENT_RELAY: &str = "relay";
pub const COMPONENT_TRANSPORT: &str = "transport";
pub const COMPONENT_CONSUMER: &str = "consumer";

// ============================================================================
// Messages
// ============================================================================

pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

impl UpdateHealth {
    pub fn new(component: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            component: component.into(),
            status,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize, Reply)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    circuit_breaker: Option<CircuitBreaker>,
    metrics: Option<Arc<Metrics>>,
    check_interval: Duration,
}

impl HealthMonitorActor {
    pub fn new() -> Self {
        Self {
            components: HashMap::new(),
            circuit_breaker: None,
            metrics: None,
            check_interval: Duration::from_secs(10),
        }
    }

    /// Watch a transport breaker, publishing its state as the "transport"
    /// component and into the `circuit_breaker_state` gauge
    pub fn watch_circuit_breaker(
        mut self,
        circuit_breaker: CircuitBreaker,
        metrics: Arc<Metrics>,
        check_interval: Duration,
    ) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self.metrics = Some(metrics);
        self.check_interval = check_interval;
        self
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut degraded = Vec::new();
        let mut unhealthy = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => unhealthy.push(format!("{name}: {msg}")),
                HealthStatus::Degraded(msg) => degraded.push(format!("{name}: {msg}")),
                HealthStatus::Healthy => {}
            }
        }

        // Deterministic ordering for the joined message
        unhealthy.sort();
        degraded.sort();

        if !unhealthy.is_empty() {
            HealthStatus::Unhealthy(unhealthy.join(", "))
        } else if !degraded.is_empty() {
            HealthStatus::Degraded(degraded.join(", "))
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Default for HealthMonitorActor {
    fn default() -> Self {
        Self::new()
    }
}

fn breaker_health(state: CircuitState) -> HealthStatus {
    match state {
        CircuitState::Closed => HealthStatus::Healthy,
        CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
        CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("🩺 HealthMonitorActor started");

        if let (Some(breaker), Some(metrics)) = (state.circuit_breaker.clone(), state.metrics.clone()) {
            let weak = actor_ref.downgrade();
            let check_interval = state.check_interval;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(check_interval);
                loop {
                    interval.tick().await;

                    let Some(actor_ref) = weak.upgrade() else {
                        break;
                    };

                    let circuit = breaker.get_state().await;
                    metrics.update_circuit_breaker_state(circuit.as_gauge());

                    let update = UpdateHealth::new(COMPONENT_TRANSPORT, breaker_health(circuit));
                    if actor_ref.tell(update).await.is_err() {
                        break;
                    }
                }
            });
        }

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let previous = self.components.get(&msg.component).map(|h| h.status.clone());

        if previous.as_ref() != Some(&msg.status) {
            match &msg.status {
                HealthStatus::Healthy => {
                    tracing::info!(component = %msg.component, "Component healthy")
                }
                HealthStatus::Degraded(reason) => {
                    tracing::warn!(component = %msg.component, reason = %reason, "Component degraded")
                }
                HealthStatus::Unhealthy(reason) => {
                    tracing::error!(component = %msg.component, reason = %reason, "Component unhealthy")
                }
            }
        }

        let mut health = ComponentHealth::new(msg.component.clone(), msg.status);
        health.details = msg.details;
        self.components.insert(msg.component, health);
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
