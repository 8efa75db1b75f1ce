use anyhow::Context;
use roadly_api::{app, AppState, Backend, Settings};
use roadly_booking::MockPaymentGateway;
use roadly_core::repository::EventPublisher;
use roadly_core::SystemClock;
use roadly_store::app_config::{Config, StorageBackend};
use roadly_store::{
    DbClient, LogEventPublisher, PgBookingRepository, PgPaymentRepository, PgTripRepository,
    PgVoucherRepository, RedisSeatLockStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roadly_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Roadly API on port {}", config.server.port);

    let backend = build_backend(&config).await?;
    let state = AppState::build(backend, &Settings::from(&config)).context("Failed to register metrics")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = roadly_api::worker::spawn_reaper(
        &state,
        Duration::from_secs(config.business_rules.reaper_interval_seconds),
        shutdown_rx,
    );

    let app = app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    reaper.await.context("Reaper task panicked")?;
    Ok(())
}

async fn build_backend(config: &Config) -> anyhow::Result<Backend> {
    let gateway = Arc::new(MockPaymentGateway::new(config.payments.checkout_base_url.clone()));
    let clock = Arc::new(SystemClock);
    let events = event_publisher(config)?;

    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Ok(Backend { events, ..Backend::in_memory(gateway, clock) })
        }
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            let seat_locks = RedisSeatLockStore::new(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?;

            Ok(Backend {
                trips: Arc::new(PgTripRepository::new(db.pool.clone())),
                seat_locks: Arc::new(seat_locks),
                bookings: Arc::new(PgBookingRepository::new(db.pool.clone())),
                vouchers: Arc::new(PgVoucherRepository::new(db.pool.clone())),
                payments: Arc::new(PgPaymentRepository::new(db.pool.clone())),
                events,
                gateway,
                clock,
            })
        }
    }
}

#[cfg(feature = "kafka")]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match &config.kafka.brokers {
        Some(brokers) => {
            let producer = roadly_store::EventProducer::new(brokers).context("Failed to create Kafka producer")?;
            tracing::info!("Publishing events to Kafka at {}", brokers);
            Ok(Arc::new(producer))
        }
        None => Ok(Arc::new(LogEventPublisher)),
    }
}

#[cfg(not(feature = "kafka"))]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    if config.kafka.brokers.is_some() {
        tracing::warn!("Kafka brokers configured but the kafka feature is off; events are only logged");
    }
    Ok(Arc::new(LogEventPublisher))
}
