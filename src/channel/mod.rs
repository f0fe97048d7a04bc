#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[cfg(feature = "kafka")]
pub use kafka::KafkaChannel;
pub use memory::InMemoryChannel;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// One message handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The transport cannot be reached. Callers back off and retry.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("message rejected by channel: {0}")]
    Rejected(String),
    #[error("channel protocol error: {0}")]
    Protocol(String),
}

impl ChannelError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_))
    }
}

/// Messages with the same key keep their publish order. A delivery that is
/// never committed comes back after the next subscribe.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), ChannelError>;

    /// Join `group` on `topic`, resuming from the group's committed offsets.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError>;

    /// Release the client. Publishing or subscribing afterwards fails with
    /// [`ChannelError::Unavailable`].
    async fn shutdown(&self);
}

#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next delivery. `Ok(None)` means nothing
    /// arrived in time; the subscription is still healthy.
    async fn next(&mut self, timeout: Duration) -> Result<Option<Delivery>, ChannelError>;

    /// Mark `delivery` (and everything before it on its partition) processed.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), ChannelError>;
}

/// Stable key → partition mapping.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    crc32fast::hash(key.as_bytes()) % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_bounded() {
        for key in ["1", "2", "42", "room-7"] {
            let p = partition_for(key, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(key, 4));
        }
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn only_unavailable_is_unavailable() {
        assert!(ChannelError::Unavailable("down".into()).is_unavailable());
        assert!(!ChannelError::Rejected("too big".into()).is_unavailable());
        assert!(!ChannelError::Protocol("bad".into()).is_unavailable());
    }
}
