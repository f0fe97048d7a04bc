use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::rooms::RoomStore;

/// A WAL-backed store that can rewrite its log down to live state.
#[async_trait]
pub trait Compactable: Send + Sync {
    fn label(&self) -> &'static str;
    async fn appends_since_compact(&self) -> u64;
    async fn compact(&self) -> Result<(), String>;
}

#[async_trait]
impl Compactable for Engine {
    fn label(&self) -> &'static str {
        "reservations"
    }

    async fn appends_since_compact(&self) -> u64 {
        self.wal_appends_since_compact().await
    }

    async fn compact(&self) -> Result<(), String> {
        self.compact_wal().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Compactable for RoomStore {
    fn label(&self) -> &'static str {
        "rooms"
    }

    async fn appends_since_compact(&self) -> u64 {
        self.wal_appends_since_compact().await
    }

    async fn compact(&self) -> Result<(), String> {
        self.compact_wal().await.map_err(|e| e.to_string())
    }
}

/// Compact `target` whenever `threshold` appends have piled up since the
/// last rewrite. Returns whether a compaction ran.
pub async fn compact_if_due(target: &dyn Compactable, threshold: u64) -> bool {
    let pending = target.appends_since_compact().await;
    if pending < threshold {
        return false;
    }
    match target.compact().await {
        Ok(()) => {
            debug!(store = target.label(), pending, "compaction done");
            true
        }
        Err(e) => {
            warn!(store = target.label(), "compaction failed: {e}");
            false
        }
    }
}

/// Background task; runs until the process exits.
pub async fn run_compactor(target: Arc<dyn Compactable>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(target.as_ref(), threshold).await;
    }
}
