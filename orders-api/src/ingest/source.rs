//! Message sources.

use async_trait::async_trait;
use orders_core::IngestError;
use tokio::sync::mpsc;

/// A raw message read from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Position of the message in its partition.
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Ordered stream of raw messages.
///
/// `next_message` must be cancel safe: dropping the future before it
/// completes must not lose a message.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message. `Ok(None)` means the source is exhausted
    /// and will never yield again.
    async fn next_message(&mut self) -> Result<Option<Message>, IngestError>;

    /// Record that every message before `next_offset` has been handled, so
    /// a restarted source resumes there. Sources without a durable position
    /// keep the default.
    async fn commit(&mut self, _next_offset: i64) -> Result<(), IngestError> {
        Ok(())
    }
}

/// In-process source fed through an mpsc channel.
///
/// The source is exhausted once every sender has been dropped and the
/// buffered payloads are drained.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
    next_offset: i64,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx, next_offset: 0 }
    }

    /// Create a bounded channel and the source reading from it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Result<Option<Message>, IngestError> {
        let Some(payload) = self.rx.recv().await else {
            return Ok(None);
        };
        let offset = self.next_offset;
        self.next_offset += 1;
        Ok(Some(Message {
            offset,
            key: None,
            payload,
        }))
    }
}
