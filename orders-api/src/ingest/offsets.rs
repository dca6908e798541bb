//! Durable consumer positions.
//!
//! rskafka talks to partitions directly and does not join consumer groups,
//! so the group's position is kept in an [`OffsetStore`] instead of the
//! broker. A source commits the offset after each handled message and
//! resumes from it on the next connect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use orders_core::IngestError;

use super::kafka::StartOffset;

/// Identifies one consumer position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub group_id: String,
    pub topic: String,
    pub partition: i32,
}

impl PartitionKey {
    pub fn new(group_id: impl Into<String>, topic: impl Into<String>, partition: i32) -> Self {
        Self {
            group_id: group_id.into(),
            topic: topic.into(),
            partition,
        }
    }
}

/// Persistent map from [`PartitionKey`] to the next offset to read.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// The committed position, if any.
    async fn load(&self, key: &PartitionKey) -> Result<Option<i64>, IngestError>;

    /// Record that every offset below `next_offset` has been handled.
    async fn commit(&self, key: &PartitionKey, next_offset: i64) -> Result<(), IngestError>;
}

/// Pick the offset to start reading from.
///
/// A committed position is used when the broker still holds it, that is
/// when it lies in `earliest..=latest`. Otherwise (nothing committed, or
/// the position fell out of retention) the configured start applies.
pub fn resume_offset(stored: Option<i64>, earliest: i64, latest: i64, start: StartOffset) -> i64 {
    match stored {
        Some(next) if (earliest..=latest).contains(&next) => next,
        _ => match start {
            StartOffset::Earliest => earliest,
            StartOffset::Latest => latest,
        },
    }
}

/// Load the committed position for `key` and resolve it against the
/// partition bounds.
pub async fn resolve_start(
    store: &dyn OffsetStore,
    key: &PartitionKey,
    earliest: i64,
    latest: i64,
    start: StartOffset,
) -> Result<i64, IngestError> {
    let stored = store.load(key).await?;
    let offset = resume_offset(stored, earliest, latest, start);
    match stored {
        Some(next) if next != offset => tracing::warn!(
            group_id = %key.group_id,
            topic = %key.topic,
            committed = next,
            earliest,
            latest,
            offset,
            "Committed offset is outside the partition, falling back to start position"
        ),
        Some(_) => tracing::info!(
            group_id = %key.group_id,
            topic = %key.topic,
            offset,
            "Resuming from committed offset"
        ),
        None => tracing::info!(
            group_id = %key.group_id,
            topic = %key.topic,
            offset,
            "No committed offset, using start position"
        ),
    }
    Ok(offset)
}

/// Offset store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryOffsetStore {
    offsets: Mutex<HashMap<PartitionKey, i64>>,
    fail_commits: AtomicBool,
    commits: AtomicU64,
}

impl InMemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `commit` fail.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successful commits.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

fn poisoned() -> IngestError {
    IngestError::OffsetStore {
        reason: "offset store lock poisoned".to_string(),
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn load(&self, key: &PartitionKey) -> Result<Option<i64>, IngestError> {
        let offsets = self.offsets.lock().map_err(|_| poisoned())?;
        Ok(offsets.get(key).copied())
    }

    async fn commit(&self, key: &PartitionKey, next_offset: i64) -> Result<(), IngestError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(IngestError::OffsetStore {
                reason: "injected commit failure".to_string(),
            });
        }
        let mut offsets = self.offsets.lock().map_err(|_| poisoned())?;
        offsets.insert(key.clone(), next_offset);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PartitionKey {
        PartitionKey::new("group1", "orders", 0)
    }

    #[test]
    fn test_resume_offset_prefers_committed_position() {
        assert_eq!(resume_offset(Some(42), 0, 100, StartOffset::Earliest), 42);
        assert_eq!(resume_offset(Some(100), 0, 100, StartOffset::Earliest), 100);
    }

    #[test]
    fn test_resume_offset_falls_back_without_commit() {
        assert_eq!(resume_offset(None, 5, 100, StartOffset::Earliest), 5);
        assert_eq!(resume_offset(None, 5, 100, StartOffset::Latest), 100);
    }

    #[test]
    fn test_resume_offset_ignores_out_of_range_commit() {
        // Truncated by retention
        assert_eq!(resume_offset(Some(3), 10, 100, StartOffset::Earliest), 10);
        // Topic recreated
        assert_eq!(resume_offset(Some(500), 0, 100, StartOffset::Latest), 100);
    }

    #[tokio::test]
    async fn test_resolve_start_reads_committed_offset() {
        let store = InMemoryOffsetStore::new();
        assert_eq!(
            resolve_start(&store, &key(), 0, 50, StartOffset::Earliest)
                .await
                .unwrap(),
            0
        );

        store.commit(&key(), 17).await.unwrap();
        assert_eq!(
            resolve_start(&store, &key(), 0, 50, StartOffset::Earliest)
                .await
                .unwrap(),
            17
        );

        let other_group = PartitionKey::new("group2", "orders", 0);
        assert_eq!(
            resolve_start(&store, &other_group, 0, 50, StartOffset::Latest)
                .await
                .unwrap(),
            50
        );
    }

    #[tokio::test]
    async fn test_commit_overwrites_and_can_fail() {
        let store = InMemoryOffsetStore::new();
        store.commit(&key(), 1).await.unwrap();
        store.commit(&key(), 2).await.unwrap();
        assert_eq!(store.load(&key()).await.unwrap(), Some(2));
        assert_eq!(store.commits(), 2);

        store.fail_commits(true);
        assert!(matches!(
            store.commit(&key(), 3).await,
            Err(IngestError::OffsetStore { .. })
        ));
        assert_eq!(store.load(&key()).await.unwrap(), Some(2));
    }
}
