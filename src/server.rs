//! HTTP server initialization and runtime setup.
//!
//! Connects every backend, provisions partitions and the bloom filter, starts
//! the ingestion pipeline and serves until a shutdown signal arrives.

use crate::application::ingest::{CounterStore, Enrichers, IngestionPipeline};
use crate::application::services::{LinkService, StatsService};
use crate::config::Config;
use crate::domain::repositories::{AccessRepository, LinkRepository};
use crate::domain::sharding::ShardRouter;
use crate::infrastructure::bloom::BloomGate;
use crate::infrastructure::cache::CacheAsideStore;
use crate::infrastructure::kv::{MemoryStore, RedisStore, RemoteStore};
use crate::infrastructure::lock::DistributedMutex;
use crate::infrastructure::persistence::{PgAccessRepository, PgLinkRepository};
use crate::infrastructure::transport::{EventTransport, MemoryTransport, RedisStreamTransport};
use crate::routes::app_router;
use crate::state::AppState;

use anyhow::{Context, Result};
use axum::ServiceExt;
use axum::extract::Request;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Opens the PostgreSQL pool with the configured limits.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn connect_database(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_connect_timeout))
        .idle_timeout(Duration::from_secs(config.db_idle_timeout))
        .max_lifetime(Duration::from_secs(config.db_max_lifetime))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("✓ Connected to database");
    Ok(pool)
}

/// Shared store and event transport, Redis-backed when configured.
///
/// A configured but unreachable Redis is fatal.
///
/// # Errors
///
/// Returns an error if Redis is configured and cannot be reached.
pub async fn connect_backends(
    config: &Config,
) -> Result<(Arc<dyn RemoteStore>, Arc<dyn EventTransport>)> {
    match &config.redis_url {
        Some(redis_url) => {
            let store = RedisStore::connect(redis_url)
                .await
                .context("Failed to connect remote store")?;
            let transport = RedisStreamTransport::connect(redis_url, config.stream_settings())
                .await
                .context("Failed to connect event transport")?;
            tracing::info!("✓ Remote store and event stream on Redis");
            Ok((Arc::new(store), Arc::new(transport)))
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-process store and transport");
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryTransport::new())))
        }
    }
}

/// Runs the HTTP server with the given configuration.
///
/// Initializes, in order:
/// - PostgreSQL pool and link/access partitions
/// - Remote store and event transport
/// - Bloom filter (rebuilt from the partitions if missing)
/// - Ingestion worker pool and batch writer
/// - Axum HTTP server
///
/// On Ctrl-C or SIGTERM the server stops accepting connections, then the
/// ingestion workers stop and the writer flushes what it holds.
///
/// # Errors
///
/// Returns an error if any backend fails to initialize, the server cannot
/// bind, or the server fails at runtime.
pub async fn run(config: Config) -> Result<()> {
    let pool = Arc::new(connect_database(&config).await?);
    let router = ShardRouter::new(config.shard_count);

    let links: Arc<dyn LinkRepository> = Arc::new(PgLinkRepository::new(pool.clone(), router));
    let access: Arc<dyn AccessRepository> = Arc::new(PgAccessRepository::new(pool, router));
    links.ensure_schema().await?;
    access.ensure_schema().await?;
    tracing::info!("✓ {} link and access partitions ready", router.shard_count());

    let (remote, transport) = connect_backends(&config).await?;

    let bloom = Arc::new(BloomGate::new(
        remote.clone(),
        DistributedMutex::new(remote.clone()),
        config.bloom_settings(),
    ));
    if let Some(report) = bloom
        .ensure(links.clone())
        .await
        .context("Failed to provision bloom filter")?
    {
        tracing::info!("✓ Bloom filter built with {} codes", report.indexed);
    }

    let cache = Arc::new(CacheAsideStore::new(remote.clone(), config.cache_settings()));

    let link_service = Arc::new(LinkService::new(
        links.clone(),
        cache,
        bloom.clone(),
        config.cache_policy(),
        config.base_url.clone(),
    ));
    let stats_service = Arc::new(StatsService::new(
        links.clone(),
        access.clone(),
        CounterStore::new(remote.clone()),
    ));

    let pipeline = IngestionPipeline::start(
        transport.clone(),
        remote.clone(),
        access,
        router,
        Enrichers::default(),
        config.ingest_settings(),
    );

    let state = AppState {
        link_service,
        stats_service,
        links,
        bloom,
        remote,
        transport,
        behind_proxy: config.behind_proxy,
    };

    let app = app_router(state);

    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    let served = axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    pipeline.shutdown().await;
    served?;

    tracing::info!("✓ Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
