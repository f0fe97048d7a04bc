use std::sync::Arc;

use bytes::Bytes;

use crate::channel::EventChannel;
use crate::model::LifecycleEvent;
use crate::observability::{EVENTS_DROPPED_TOTAL, EVENTS_PUBLISHED_TOTAL};

/// What happened to a lifecycle event after a committed room mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The event never reached the channel. The mutation it describes is
    /// still committed; downstream services will not hear about it.
    Dropped { reason: String },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published)
    }
}

/// Emits room lifecycle events. Never fails: a lost event is reported as
/// [`PublishOutcome::Dropped`], logged and counted.
#[derive(Clone)]
pub struct LifecyclePublisher {
    channel: Arc<dyn EventChannel>,
    topic: String,
}

impl LifecyclePublisher {
    pub fn new(channel: Arc<dyn EventChannel>, topic: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
        }
    }

    pub async fn publish(&self, event: &LifecycleEvent) -> PublishOutcome {
        let event_type = event.event_type().to_string();
        // Keyed by room so one room's events stay ordered.
        let key = event
            .room_id()
            .map(|id| id.to_string())
            .unwrap_or_default();

        let outcome = match event.encode() {
            Err(e) => PublishOutcome::Dropped {
                reason: format!("encode: {e}"),
            },
            Ok(payload) => match self
                .channel
                .publish(&self.topic, &key, Bytes::from(payload))
                .await
            {
                Ok(()) => PublishOutcome::Published,
                Err(e) => PublishOutcome::Dropped {
                    reason: e.to_string(),
                },
            },
        };

        match &outcome {
            PublishOutcome::Published => {
                metrics::counter!(EVENTS_PUBLISHED_TOTAL, "event_type" => event_type.clone()).increment(1);
                tracing::debug!(topic = %self.topic, %key, %event_type, "lifecycle event published");
            }
            PublishOutcome::Dropped { reason } => {
                metrics::counter!(EVENTS_DROPPED_TOTAL, "event_type" => event_type.clone()).increment(1);
                tracing::warn!(topic = %self.topic, %key, %event_type, %reason, "lifecycle event dropped");
            }
        }
        outcome
    }
}
