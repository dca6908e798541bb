//! Orders API Server Entry Point
//!
//! Loads configuration, connects the Postgres store, the LMDB cache and the
//! Kafka source, then runs the ingestion pipeline and the cache sweep next
//! to the HTTP server until Ctrl-C.

use std::sync::Arc;

use orders_api::{
    cache_sweep_task, create_api_router, init_tracing, AppState, IngestPipeline, KafkaSource,
    OffsetStore, OrderService, OrdersConfig, PgOrderStorage,
};
use orders_core::{Order, OrdersError, OrdersResult};
use orders_storage::{LmdbOrderCache, OrderCache};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> OrdersResult<()> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let config = OrdersConfig::from_env();
    init_tracing(&config.telemetry)?;
    if !dotenv_loaded {
        tracing::debug!("No .env file found, using process environment");
    }
    config.validate()?;

    let storage = PgOrderStorage::from_config(&config.db)?;
    if config.db.run_migrations {
        storage.migrate().await?;
    }
    storage.warm_up(config.db.min_conns).await?;
    tracing::info!(
        host = %config.db.host,
        database = %config.db.dbname,
        pool_size = storage.pool_size(),
        "Connected to PostgreSQL"
    );

    let offsets: Arc<dyn OffsetStore> = Arc::new(storage.offset_store());
    let cache: Arc<dyn OrderCache> = Arc::new(LmdbOrderCache::open(&config.cache)?);
    let service = OrderService::new(Arc::new(storage), cache.clone())
        .with_config(config.service.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweep = tokio::spawn(cache_sweep_task(
        cache,
        config.cache.sweep_interval,
        shutdown_rx.clone(),
    ));

    let source = KafkaSource::connect(&config.kafka, offsets).await?;
    let pipeline = IngestPipeline::new(source, Order::from_json, Arc::new(service.clone()))
        .with_config(config.pipeline.clone());
    let ingest = tokio::spawn(pipeline.run(shutdown_rx));

    let app = create_api_router(AppState::new(service), config.server.request_timeout);
    let addr = config.server.socket_addr()?;
    tracing::info!(%addr, "Starting Orders API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| OrdersError::Startup(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .map_err(|e| OrdersError::Startup(format!("Server error: {}", e)))?;

    let snapshot = ingest
        .await
        .map_err(|e| OrdersError::Startup(format!("Ingestion task failed: {}", e)))?;
    let swept = sweep
        .await
        .map_err(|e| OrdersError::Startup(format!("Cache sweep task failed: {}", e)))?;
    tracing::info!(
        received = snapshot.received,
        persisted = snapshot.persisted,
        cache_entries_swept = swept.removed,
        "Orders API stopped"
    );

    Ok(())
}
