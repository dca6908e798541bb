//! Orders API
//!
//! Serves point lookups of order records over HTTP and ingests new orders
//! from a Kafka topic. Orders are stored in PostgreSQL and read through an
//! LMDB cache.
//!
//! - `db`: connection pool and the Postgres order store
//! - `services`: cache-aside reads and delegated writes
//! - `ingest`: message sources and the ingestion loop
//! - `jobs`: periodic background work such as the cache expiry sweep
//! - `routes`: HTTP handlers

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod openapi;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;

pub use config::{OrdersConfig, ServerConfig};
pub use db::{DbConfig, PgOffsetStore, PgOrderStorage};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use ingest::{
    ChannelSource, InMemoryOffsetStore, IngestMetrics, IngestPipeline, IngestSnapshot,
    KafkaConfig, KafkaSource, Message, MessageHandler, MessageSource, OffsetStore, PartitionKey,
    PipelineConfig, StartOffset,
};
pub use jobs::{cache_sweep_task, CacheSweepSnapshot};
pub use routes::create_api_router;
pub use services::{OrderService, ServiceConfig};
pub use state::AppState;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
