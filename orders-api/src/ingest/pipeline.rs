//! The ingestion loop.
//!
//! Reads one message at a time, decodes it and hands it to the handler.
//! A message that fails to decode or to dispatch is logged, counted and
//! dropped; the loop moves on to the next one. Only the shutdown signal
//! (or an exhausted source) ends the loop.
//!
//! After each message, handled or dropped, the source is asked to commit
//! the following offset. A failed commit is logged and counted; the worst
//! outcome is that a restart replays messages the store then rejects as
//! duplicates.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orders_core::DecodeError;
use tokio::sync::watch;

use super::source::{Message, MessageSource};
use super::MessageHandler;

/// Default pause after a failed read.
pub const DEFAULT_READ_RETRY_BACKOFF: Duration = Duration::from_millis(1000);

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pause before reading again after a transport error.
    pub read_retry_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            read_retry_backoff: DEFAULT_READ_RETRY_BACKOFF,
        }
    }
}

impl PipelineConfig {
    /// # Environment Variables
    /// - `KAFKA_RETRY_BACKOFF_MS`: pause after a failed read (default: 1000)
    pub fn from_env() -> Self {
        Self {
            read_retry_backoff: std::env::var("KAFKA_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_READ_RETRY_BACKOFF),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters updated while the pipeline runs.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Messages read from the source
    pub received: AtomicU64,
    /// Messages the handler accepted
    pub persisted: AtomicU64,
    /// Messages dropped because they did not decode
    pub decode_failures: AtomicU64,
    /// Messages the handler rejected
    pub dispatch_failures: AtomicU64,
    /// Failed reads from the source
    pub read_errors: AtomicU64,
    /// Failed offset commits
    pub commit_errors: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of ingestion metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSnapshot {
    pub received: u64,
    pub persisted: u64,
    pub decode_failures: u64,
    pub dispatch_failures: u64,
    pub read_errors: u64,
    pub commit_errors: u64,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Source, decoder and handler wired into one long-lived loop.
pub struct IngestPipeline<S, M, D, H: ?Sized> {
    source: S,
    decode: D,
    handler: Arc<H>,
    config: PipelineConfig,
    metrics: Arc<IngestMetrics>,
    _message: PhantomData<fn() -> M>,
}

impl<S, M, D, H> IngestPipeline<S, M, D, H>
where
    S: MessageSource,
    M: Send,
    D: Fn(&[u8]) -> Result<M, DecodeError> + Send,
    H: MessageHandler<M> + ?Sized,
{
    pub fn new(source: S, decode: D, handler: Arc<H>) -> Self {
        Self {
            source,
            decode,
            handler,
            config: PipelineConfig::default(),
            metrics: Arc::new(IngestMetrics::new()),
            _message: PhantomData,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared handle to the live counters.
    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until `shutdown_rx` flips to `true` (or its sender is dropped),
    /// or until the source is exhausted.
    ///
    /// A dispatch already in progress completes before shutdown is observed.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> IngestSnapshot {
        tracing::info!(
            read_retry_backoff_ms = self.config.read_retry_backoff.as_millis() as u64,
            "Ingestion pipeline started"
        );

        loop {
            let next = tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    tracing::info!("Ingestion pipeline shutting down");
                    break;
                }

                next = self.source.next_message() => next,
            };

            match next {
                Ok(Some(message)) => {
                    let next_offset = message.offset + 1;
                    self.process(message).await;
                    if let Err(e) = self.source.commit(next_offset).await {
                        self.metrics.commit_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(next_offset, error = %e, "Failed to commit offset");
                    }
                }
                Ok(None) => {
                    tracing::info!("Message source exhausted");
                    break;
                }
                Err(e) => {
                    self.metrics.read_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Failed to read message, retrying");

                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown_rx) => {
                            tracing::info!("Ingestion pipeline shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(self.config.read_retry_backoff) => {}
                    }
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            received = snapshot.received,
            persisted = snapshot.persisted,
            decode_failures = snapshot.decode_failures,
            dispatch_failures = snapshot.dispatch_failures,
            read_errors = snapshot.read_errors,
            commit_errors = snapshot.commit_errors,
            "Ingestion pipeline stopped"
        );
        snapshot
    }

    async fn process(&self, message: Message) {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);

        let decoded = match (self.decode)(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(offset = message.offset, error = %e, "Skipping undecodable message");
                return;
            }
        };

        match self.handler.handle(decoded).await {
            Ok(()) => {
                self.metrics.persisted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(offset = message.offset, "Message processed");
            }
            Err(e) => {
                self.metrics.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(offset = message.offset, error = %e, "Failed to process message");
            }
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ChannelSource;
    use async_trait::async_trait;
    use orders_core::{IngestError, OrdersError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler<String> for Recorder {
        async fn handle(&self, message: String) -> Result<(), OrdersError> {
            if message == "reject" {
                return Err(OrdersError::Startup("rejected".to_string()));
            }
            self.seen.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn decode_utf8(bytes: &[u8]) -> Result<String, DecodeError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::Malformed {
            reason: e.to_string(),
        })
    }

    #[tokio::test]
    async fn test_skips_bad_messages_and_counts_them() {
        let (tx, source) = ChannelSource::channel(8);
        let handler = Arc::new(Recorder::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(vec![0xff, 0xfe]).await.unwrap();
        tx.send(b"reject".to_vec()).await.unwrap();
        tx.send(b"ok".to_vec()).await.unwrap();
        drop(tx);

        let snapshot = IngestPipeline::new(source, decode_utf8, handler.clone())
            .run(shutdown_rx)
            .await;

        assert_eq!(
            snapshot,
            IngestSnapshot {
                received: 3,
                persisted: 1,
                decode_failures: 1,
                dispatch_failures: 1,
                read_errors: 0,
                commit_errors: 0,
            }
        );
        assert_eq!(*handler.seen.lock().unwrap(), vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_blocked_read() {
        let (_tx, source) = ChannelSource::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = IngestPipeline::new(source, decode_utf8, Arc::new(Recorder::default()));

        let handle = tokio::spawn(pipeline.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pipeline should stop promptly")
            .expect("pipeline task should not panic");
        assert_eq!(snapshot.received, 0);
    }

    #[test]
    fn test_snapshot_reads_counters() {
        let metrics = IngestMetrics::new();
        metrics.received.fetch_add(2, Ordering::Relaxed);
        metrics.read_errors.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.read_errors, 1);
        assert_eq!(snapshot.persisted, 0);
    }

    /// Channel source that records every commit.
    struct CommitLog {
        inner: ChannelSource,
        commits: Arc<Mutex<Vec<i64>>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageSource for CommitLog {
        async fn next_message(&mut self) -> Result<Option<Message>, IngestError> {
            self.inner.next_message().await
        }

        async fn commit(&mut self, next_offset: i64) -> Result<(), IngestError> {
            if self.fail {
                return Err(IngestError::OffsetStore {
                    reason: "store down".to_string(),
                });
            }
            self.commits.lock().unwrap().push(next_offset);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commits_after_every_message_including_dropped_ones() {
        let (tx, inner) = ChannelSource::channel(8);
        let commits = Arc::new(Mutex::new(Vec::new()));
        let source = CommitLog {
            inner,
            commits: commits.clone(),
            fail: false,
        };
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(b"ok".to_vec()).await.unwrap();
        tx.send(vec![0xff]).await.unwrap();
        tx.send(b"reject".to_vec()).await.unwrap();
        drop(tx);

        let snapshot = IngestPipeline::new(source, decode_utf8, Arc::new(Recorder::default()))
            .run(shutdown_rx)
            .await;

        assert_eq!(*commits.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(snapshot.commit_errors, 0);
    }

    #[tokio::test]
    async fn test_commit_failures_are_counted_and_do_not_stop_the_loop() {
        let (tx, inner) = ChannelSource::channel(8);
        let source = CommitLog {
            inner,
            commits: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        };
        let handler = Arc::new(Recorder::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(b"a".to_vec()).await.unwrap();
        tx.send(b"b".to_vec()).await.unwrap();
        drop(tx);

        let snapshot = IngestPipeline::new(source, decode_utf8, handler.clone())
            .run(shutdown_rx)
            .await;

        assert_eq!(snapshot.persisted, 2);
        assert_eq!(snapshot.commit_errors, 2);
        assert_eq!(handler.seen.lock().unwrap().len(), 2);
    }
}
