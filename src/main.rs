//! Tourist-safety tracking server.
//!
//! Wires the engine to Redis (sessions, consent, hot cache, zone snapshot)
//! and `PostgreSQL` (history), then serves the HTTP/WebSocket surface.
//! A missing history store is fatal only in strict mode; otherwise the
//! engine starts degraded and keeps live tracking and alerting working.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tourguard::auth::RedisAuthSessions;
use tourguard::clock::SystemClock;
use tourguard::config::Config;
use tourguard::engine::Engine;
use tourguard::server::{build_router, AppState};
use tourguard::stores::{
    HistoryStore, PostgresHistoryStore, RedisConsentGate, RedisLiveCache, RedisZoneSnapshotStore,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tourguard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tourist-safety tracking server");

    let config = Arc::new(Config::from_env());
    info!(
        redis_url = %config.redis.url,
        database_url = %config.postgres.url,
        strict_history = config.engine.strict_history,
        "Configuration loaded"
    );

    // Redis carries sessions and consent; without it no request can be
    // authenticated, so a connection failure here is fatal.
    info!("Connecting to Redis...");
    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    info!("Redis connected");

    let sessions = Arc::new(RedisAuthSessions::from_connection(redis_conn.clone()));
    let consent = Arc::new(RedisConsentGate::from_connection(redis_conn.clone()));
    let cache = Arc::new(RedisLiveCache::from_connection(redis_conn.clone()));
    let snapshot_store = Arc::new(RedisZoneSnapshotStore::from_connection(redis_conn));

    // History store: required in strict mode, best-effort otherwise.
    info!("Connecting to history database...");
    let history: Option<Arc<dyn HistoryStore>> = match connect_history(&config).await {
        Ok(store) => {
            info!("History store connected");
            Some(Arc::new(store))
        }
        Err(e) if config.engine.strict_history => {
            error!(error = %e, "History store required in strict mode");
            return Err(e);
        }
        Err(e) => {
            warn!(error = %e, "History store unavailable; starting degraded");
            None
        }
    };

    let engine = Engine::new(
        Arc::new(SystemClock),
        config.engine.clone(),
        config.rate_limits.clone(),
        consent,
        history,
        Some(cache),
        Some(snapshot_store),
    );

    engine.restore_zones().await;
    engine.warm_from_cache().await;

    // Retention sweeps run for the life of the process.
    spawn_compactor(engine.clone(), config.engine.compactor_interval_secs);

    let state = AppState::new(config.clone(), engine, sessions);
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(address = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn connect_history(config: &Config) -> anyhow::Result<PostgresHistoryStore> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await?;
    let store = PostgresHistoryStore::new(Arc::new(pool));
    store.ensure_schema().await?;
    Ok(store)
}

/// Periodic retention sweep over history rows and zone tombstones.
fn spawn_compactor(engine: Arc<Engine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(60)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quick.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = engine.run_compaction().await;
            tracing::debug!(rows = purged, "Retention sweep finished");
        }
    });
}

/// Graceful shutdown on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
