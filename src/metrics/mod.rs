// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Outbox relay throughput, failures and dead-letters
// - Relay tick latency and skipped (overlapping) ticks
// - Transport circuit breaker state
// - Consumer-side outcomes (applied, duplicate, stale, failed)
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the relay process
pub struct Metrics {
    registry: Registry,

    // Relay
    pub outbox_events_published: IntCounterVec,
    pub outbox_publish_failures: IntCounterVec,
    pub outbox_dead_lettered: IntCounterVec,
    pub relay_ticks: IntCounterVec,
    pub relay_tick_duration: HistogramVec,

    // Transport
    pub circuit_breaker_state: IntGauge,

    // Consumer
    pub consumer_events: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let outbox_events_published = IntCounterVec::new(
            Opts::new("outbox_events_published_total", "Outbox events published to the transport"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_events_published.clone()))?;

        let outbox_publish_failures = IntCounterVec::new(
            Opts::new("outbox_publish_failures_total", "Outbox entries whose relay attempt failed"),
            &["event_type", "reason"],
        )?;
        registry.register(Box::new(outbox_publish_failures.clone()))?;

        let outbox_dead_lettered = IntCounterVec::new(
            Opts::new("outbox_dead_lettered_total", "Outbox entries moved to FAILED"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_dead_lettered.clone()))?;

        let relay_ticks = IntCounterVec::new(
            Opts::new("relay_ticks_total", "Relay ticks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(relay_ticks.clone()))?;

        let relay_tick_duration = HistogramVec::new(
            HistogramOpts::new("relay_tick_duration_seconds", "Relay tick duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(relay_tick_duration.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Transport circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let consumer_events = IntCounterVec::new(
            Opts::new("consumer_events_total", "Events handled by the consumer by outcome"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(consumer_events.clone()))?;

        Ok(Self {
            registry,
            outbox_events_published,
            outbox_publish_failures,
            outbox_dead_lettered,
            relay_ticks,
            relay_tick_duration,
            circuit_breaker_state,
            consumer_events,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_published(&self, event_type: &str) {
        self.outbox_events_published.with_label_values(&[event_type]).inc();
    }

    /// `reason` is one of "transport" or "decode"
    pub fn record_publish_failure(&self, event_type: &str, reason: &str) {
        self.outbox_publish_failures
            .with_label_values(&[event_type, reason])
            .inc();
    }

    pub fn record_dead_letter(&self, event_type: &str) {
        self.outbox_dead_lettered.with_label_values(&[event_type]).inc();
    }

    /// `outcome` is one of "completed", "skipped" or "error"
    pub fn record_tick(&self, outcome: &str, duration_secs: f64) {
        self.relay_ticks.with_label_values(&[outcome]).inc();
        self.relay_tick_duration
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn update_circuit_breaker_state(&self, state: u8) {
        self.circuit_breaker_state.set(state as i64);
    }

    pub fn record_consumer_event(&self, event_type: &str, outcome: &str) {
        self.consumer_events
            .with_label_values(&[event_type, outcome])
            .inc();
    }
}
