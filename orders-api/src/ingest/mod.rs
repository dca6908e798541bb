//! Message ingestion.
//!
//! A [`MessageSource`] yields raw payloads, a decode function turns them into
//! typed messages, and a [`MessageHandler`] acts on each one. The pipeline
//! that ties them together runs until it is told to stop.
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let pipeline = IngestPipeline::new(source, Order::from_json, Arc::new(service));
//! let handle = tokio::spawn(pipeline.run(shutdown_rx));
//!
//! // Later
//! let _ = shutdown_tx.send(true);
//! let snapshot = handle.await?;
//! ```

pub mod kafka;
pub mod offsets;
pub mod pipeline;
pub mod source;

use async_trait::async_trait;
use orders_core::OrdersError;

pub use kafka::{KafkaConfig, KafkaSource, StartOffset};
pub use offsets::{resolve_start, resume_offset, InMemoryOffsetStore, OffsetStore, PartitionKey};
pub use pipeline::{IngestMetrics, IngestPipeline, IngestSnapshot, PipelineConfig};
pub use source::{ChannelSource, Message, MessageSource};

/// Consumer of decoded messages.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    async fn handle(&self, message: M) -> Result<(), OrdersError>;
}
