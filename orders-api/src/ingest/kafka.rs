//! Kafka-backed message source.
//!
//! Uses rskafka, a pure Rust client. rskafka does not join consumer groups,
//! so the source reads partition 0 of the topic directly and keeps the
//! group's position in an [`OffsetStore`]. On connect it resumes from the
//! committed offset; the configured start position only applies when
//! nothing usable was committed. Messages handled after the last commit
//! are replayed and rejected by the store's primary key.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orders_core::{ConfigError, IngestError};
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use rskafka::record::RecordAndOffset;

use super::offsets::{resolve_start, OffsetStore, PartitionKey};
use super::source::{Message, MessageSource};

const PARTITION: i32 = 0;
const NUM_PARTITIONS: i32 = 1;
const REPLICATION_FACTOR: i16 = 1;
const CREATE_TOPIC_TIMEOUT_MS: i32 = 5_000;

/// Where to begin reading when the source starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
}

impl FromStr for StartOffset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(StartOffset::Earliest),
            "latest" => Ok(StartOffset::Latest),
            other => Err(ConfigError::InvalidValue {
                field: "start_offset".to_string(),
                value: other.to_string(),
                reason: "expected 'earliest' or 'latest'".to_string(),
            }),
        }
    }
}

/// Kafka connection settings.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub host: String,
    pub port: u16,
    /// Names the committed position in the offset store.
    pub group_id: String,
    pub topic: String,
    /// Bootstrap broker, `host:port`.
    pub broker: String,
    /// Raw `KAFKA_START_OFFSET` value, checked by [`KafkaConfig::start_offset`].
    pub start_offset: String,
    /// Longest a fetch waits for new records.
    pub max_wait: Duration,
    /// Upper bound on bytes returned by one fetch.
    pub max_bytes: i32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9092,
            group_id: "group1".to_string(),
            topic: "orders".to_string(),
            broker: "localhost:9092".to_string(),
            start_offset: "earliest".to_string(),
            max_wait: Duration::from_millis(500),
            max_bytes: 10_000_000,
        }
    }
}

impl KafkaConfig {
    /// Create a Kafka configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `KAFKA_HOST` / `KAFKA_PORT`: broker address when `KAFKA_BROKER` is unset
    /// - `KAFKA_BROKER`: bootstrap broker (default: `KAFKA_HOST:KAFKA_PORT`)
    /// - `KAFKA_GROUP_ID`: consumer group whose position is resumed (default: group1)
    /// - `KAFKA_TOPIC`: topic to consume (default: orders)
    /// - `KAFKA_START_OFFSET`: `earliest` or `latest` (default: earliest)
    /// - `KAFKA_MAX_WAIT_MS`: fetch wait (default: 500)
    /// - `KAFKA_MAX_BYTES`: fetch size limit (default: 10000000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = std::env::var("KAFKA_HOST").unwrap_or(defaults.host);
        let port = std::env::var("KAFKA_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);
        let broker = std::env::var("KAFKA_BROKER").unwrap_or_else(|_| format!("{}:{}", host, port));

        Self {
            host,
            port,
            group_id: std::env::var("KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            topic: std::env::var("KAFKA_TOPIC").unwrap_or(defaults.topic),
            broker,
            start_offset: std::env::var("KAFKA_START_OFFSET").unwrap_or(defaults.start_offset),
            max_wait: std::env::var("KAFKA_MAX_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_wait),
            max_bytes: std::env::var("KAFKA_MAX_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_bytes),
        }
    }

    /// Parsed start position.
    pub fn start_offset(&self) -> Result<StartOffset, ConfigError> {
        self.start_offset.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.start_offset()?;
        if self.topic.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "topic".to_string(),
                value: self.topic.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_bytes < 1 {
            return Err(ConfigError::InvalidValue {
                field: "max_bytes".to_string(),
                value: self.max_bytes.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn transport(e: impl std::fmt::Display) -> IngestError {
    IngestError::Transport {
        reason: e.to_string(),
    }
}

/// Reads partition 0 of a topic.
pub struct KafkaSource {
    partition: PartitionClient,
    offsets: Arc<dyn OffsetStore>,
    key: PartitionKey,
    offset: i64,
    buffer: VecDeque<RecordAndOffset>,
    max_wait_ms: i32,
    max_bytes: i32,
}

impl KafkaSource {
    /// Connect to the broker, create the topic if it is missing and position
    /// the reader at the group's committed offset, or at the configured
    /// start offset when there is none.
    pub async fn connect(
        config: &KafkaConfig,
        offsets: Arc<dyn OffsetStore>,
    ) -> Result<Self, IngestError> {
        let start = config.start_offset().map_err(|e| IngestError::TopicSetup {
            topic: config.topic.clone(),
            reason: e.to_string(),
        })?;

        let client = ClientBuilder::new(vec![config.broker.clone()])
            .build()
            .await
            .map_err(transport)?;

        let topic_error = |e: rskafka::client::error::Error| IngestError::TopicSetup {
            topic: config.topic.clone(),
            reason: e.to_string(),
        };

        let topics = client.list_topics().await.map_err(topic_error)?;
        if !topics.iter().any(|t| t.name == config.topic) {
            client
                .controller_client()
                .map_err(topic_error)?
                .create_topic(
                    config.topic.clone(),
                    NUM_PARTITIONS,
                    REPLICATION_FACTOR,
                    CREATE_TOPIC_TIMEOUT_MS,
                )
                .await
                .map_err(topic_error)?;
            tracing::info!(topic = %config.topic, "Created topic");
        }

        let partition = client
            .partition_client(config.topic.clone(), PARTITION, UnknownTopicHandling::Retry)
            .await
            .map_err(topic_error)?;
        let earliest = partition
            .get_offset(OffsetAt::Earliest)
            .await
            .map_err(transport)?;
        let latest = partition
            .get_offset(OffsetAt::Latest)
            .await
            .map_err(transport)?;

        let key = PartitionKey::new(config.group_id.clone(), config.topic.clone(), PARTITION);
        let offset = resolve_start(offsets.as_ref(), &key, earliest, latest, start).await?;

        tracing::info!(
            broker = %config.broker,
            topic = %config.topic,
            group_id = %config.group_id,
            offset,
            "Kafka source connected"
        );

        Ok(Self {
            partition,
            offsets,
            key,
            offset,
            buffer: VecDeque::new(),
            max_wait_ms: i32::try_from(config.max_wait.as_millis()).unwrap_or(i32::MAX),
            max_bytes: config.max_bytes,
        })
    }

    /// Offset of the next record to be returned.
    pub fn offset(&self) -> i64 {
        self.offset
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn next_message(&mut self) -> Result<Option<Message>, IngestError> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                self.offset = entry.offset + 1;
                return Ok(Some(Message {
                    offset: entry.offset,
                    key: entry.record.key,
                    payload: entry.record.value.unwrap_or_default(),
                }));
            }

            // Nothing buffered: long-poll the broker. Cancelling here loses
            // nothing since the offset only moves when a record is returned.
            let (records, _high_watermark) = self
                .partition
                .fetch_records(self.offset, 1..self.max_bytes, self.max_wait_ms)
                .await
                .map_err(transport)?;

            let next = self.offset;
            self.buffer
                .extend(records.into_iter().filter(|record| record.offset >= next));
        }
    }

    async fn commit(&mut self, next_offset: i64) -> Result<(), IngestError> {
        self.offsets.commit(&self.key, next_offset).await
    }
}
