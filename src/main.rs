use kameo::Actor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use user_outbox_relay::actors::HealthMonitorActor;
use user_outbox_relay::config::{
    AppConfig, ConfigLoader, IdempotencyBackend, ProjectionBackend, StoreBackend, TransportBackend,
};
use user_outbox_relay::consumer::{
    consume_channel, IdempotencyStore, IdempotentConsumer, KafkaEventConsumer, LocalUserProjection,
    MemoryIdempotencyStore, RedisIdempotencyStore, UserDirectory, UserProjection,
};
use user_outbox_relay::messaging::{ChannelPublisher, MessagePublisher, RedpandaPublisher};
use user_outbox_relay::metrics::{self, Metrics};
use user_outbox_relay::outbox::{OutboxRelay, OutboxStore, RelayScheduler};
use user_outbox_relay::storage::{MemoryStore, PgStore, TransactionalStore};
use user_outbox_relay::users::{NewUser, UserService};
use user_outbox_relay::utils::RetryConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,user_outbox_relay=debug")),
        )
        .init();

    tracing::info!("🚀 Starting user outbox relay");

    let config = ConfigLoader::new().load()?;
    tracing::info!(
        store = ?config.store,
        transport = ?config.transport,
        batch_size = config.relay.batch_size,
        max_attempts = config.relay.max_attempts,
        poll_interval_ms = config.relay.poll_interval_ms,
        "Configuration loaded"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Outbox store and consumer projection ===
    let mut demo: Option<UserService<MemoryStore>> = None;
    let (outbox_store, projection): (Arc<dyn OutboxStore>, Arc<dyn UserProjection>) = match config.store {
        StoreBackend::Postgres => {
            let store = Arc::new(PgStore::connect(&config.database).await?);
            if config.database.apply_schema {
                store.apply_schema().await?;
            }
            let projection = build_projection(&config, UserService::new(store.clone()));
            (store as Arc<dyn OutboxStore>, projection)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; outbox contents are lost on exit");
            let store = Arc::new(MemoryStore::new());
            let service = UserService::new(store.clone());
            demo = Some(service.clone());
            (store as Arc<dyn OutboxStore>, build_projection(&config, service))
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // === 3. Transport, health monitor and consumer ===
    let consumer = Arc::new(build_consumer(&config, projection, metrics.clone()).await?);
    let (publisher, health) = match config.transport {
        TransportBackend::Kafka => {
            let publisher = RedpandaPublisher::new(&config.kafka)?;
            let health = HealthMonitorActor::spawn(HealthMonitorActor::new().watch_circuit_breaker(
                publisher.circuit_breaker(),
                metrics.clone(),
                Duration::from_secs(10),
            ));

            if config.kafka.enable_consumer {
                let kafka_consumer = KafkaEventConsumer::new(&config.kafka, consumer.clone())?
                    .with_health_monitor(health.clone());
                tasks.push(tokio::spawn(kafka_consumer.run(shutdown_rx.clone())));
            }

            (Arc::new(publisher) as Arc<dyn MessagePublisher>, health)
        }
        TransportBackend::Channel => {
            let (publisher, deliveries) = ChannelPublisher::new(1024);
            tasks.push(tokio::spawn(consume_channel(deliveries, consumer.clone(), shutdown_rx.clone())));

            let health = HealthMonitorActor::spawn(HealthMonitorActor::new());
            (Arc::new(publisher) as Arc<dyn MessagePublisher>, health)
        }
    };

    // === 4. Metrics server on its own actix system ===
    if config.metrics.enabled {
        let metrics = metrics.clone();
        let health = health.clone();
        let port = config.metrics.port;
        std::thread::spawn(move || {
            let system = actix_web::rt::System::new();
            if let Err(e) = system.block_on(metrics::start_metrics_server(metrics, health, port)) {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // === 5. Relay ===
    let relay = Arc::new(OutboxRelay::new(
        outbox_store,
        publisher,
        metrics.clone(),
        config.relay.settings(),
    ));
    let scheduler = RelayScheduler::new(relay, config.relay.poll_interval()).with_health_monitor(health);
    tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

    // === 6. Demonstrate the user lifecycle when running in memory ===
    if let Some(service) = demo {
        run_demo(&service).await?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, waiting for in-flight work");

    // Receivers may already be gone if every task exited
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }

    tracing::info!("👋 Stopped");
    Ok(())
}

fn build_projection<S: TransactionalStore + 'static>(
    config: &AppConfig,
    users: UserService<S>,
) -> Arc<dyn UserProjection> {
    match config.consumer.projection {
        ProjectionBackend::Local => Arc::new(LocalUserProjection::new(users)),
        ProjectionBackend::Directory => Arc::new(UserDirectory::new()),
    }
}

async fn build_consumer(
    config: &AppConfig,
    projection: Arc<dyn UserProjection>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<IdempotentConsumer> {
    let idempotency: Arc<dyn IdempotencyStore> = match config.consumer.idempotency {
        IdempotencyBackend::Memory => Arc::new(MemoryIdempotencyStore::new(config.consumer.memory_capacity)),
        IdempotencyBackend::Redis => Arc::new(
            RedisIdempotencyStore::connect(&config.consumer.redis_url, config.consumer.key_ttl_secs).await?,
        ),
    };

    let retry = RetryConfig::exponential(
        config.consumer.apply_max_attempts,
        Duration::from_millis(100),
        Duration::from_secs(5),
    );

    Ok(IdempotentConsumer::new(idempotency, projection, metrics).with_retry(retry))
}

async fn run_demo(service: &UserService<MemoryStore>) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating user lifecycle with the outbox");

    let user = service.create_user(NewUser::new("ada@example.com", "Ada")).await?;
    service.update_user_name(user.id, "Ada Lovelace").await?;

    // The local row for this identity appears once the registration is consumed
    service.register_user("idp-42", "grace@example.com", "Grace").await?;
    service.change_email("idp-42", "grace.hopper@example.com").await?;

    service.delete_user(user.id).await?;

    tracing::info!(
        users = service.list_users().await?.len(),
        "✅ Demo writes committed; the relay publishes them on its next tick"
    );
    Ok(())
}
