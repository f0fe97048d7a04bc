use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Notify;

use super::{partition_for, ChannelError, Delivery, EventChannel, Subscription};

pub const DEFAULT_PARTITIONS: u32 = 4;

#[derive(Debug, Clone)]
struct Stored {
    key: String,
    payload: Bytes,
}

struct Inner {
    partitions: u32,
    /// topic → per-partition log
    logs: DashMap<String, Vec<Vec<Stored>>>,
    /// (topic, group) → committed next offset per partition
    committed: DashMap<(String, String), Vec<i64>>,
    available: AtomicBool,
    closed: AtomicBool,
    /// Bumped on every outage so subscriptions opened before it go stale.
    generation: AtomicU64,
    failing_connects: AtomicU32,
    connect_attempts: AtomicU64,
    notify: Notify,
}

impl Inner {
    fn check_up(&self) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Unavailable("channel shut down".into()));
        }
        if !self.available.load(Ordering::Acquire) {
            return Err(ChannelError::Unavailable("broker unreachable".into()));
        }
        Ok(())
    }
}

/// In-process durable log with consumer groups and fault injection.
///
/// Serves single-process deployments and every test that needs a channel
/// that can go down and come back. Each group is expected to have one active
/// subscriber at a time.
#[derive(Clone)]
pub struct InMemoryChannel {
    inner: Arc<Inner>,
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl InMemoryChannel {
    pub fn new(partitions: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                logs: DashMap::new(),
                committed: DashMap::new(),
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                failing_connects: AtomicU32::new(0),
                connect_attempts: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    // ── Fault injection ──────────────────────────────────────

    /// Take the channel down or bring it back. Going down breaks every open
    /// subscription; they must resubscribe once it is back.
    pub fn set_available(&self, available: bool) {
        let was = self.inner.available.swap(available, Ordering::AcqRel);
        if was && !available {
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.notify.notify_waiters();
    }

    /// The next `n` subscribe calls fail with `Unavailable` even if the
    /// channel is up.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.failing_connects.store(n, Ordering::Release);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::Acquire)
    }

    // ── Introspection ────────────────────────────────────────

    /// Total messages ever published to `topic`.
    pub fn published(&self, topic: &str) -> usize {
        self.inner
            .logs
            .get(topic)
            .map(|parts| parts.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Messages on `topic` that `group` has not committed yet.
    pub fn lag(&self, topic: &str, group: &str) -> i64 {
        let Some(parts) = self.inner.logs.get(topic) else {
            return 0;
        };
        let committed = self
            .inner
            .committed
            .get(&(topic.to_string(), group.to_string()))
            .map(|c| c.value().clone())
            .unwrap_or_default();
        parts
            .iter()
            .enumerate()
            .map(|(p, log)| log.len() as i64 - committed.get(p).copied().unwrap_or(0))
            .sum()
    }
}

#[async_trait]
impl EventChannel for InMemoryChannel {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), ChannelError> {
        self.inner.check_up()?;
        let partition = partition_for(key, self.inner.partitions) as usize;
        let partitions = self.inner.partitions as usize;
        {
            let mut parts = self
                .inner
                .logs
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); partitions]);
            parts[partition].push(Stored {
                key: key.to_string(),
                payload,
            });
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::AcqRel);
        self.inner.check_up()?;
        let failing = self.inner.failing_connects.load(Ordering::Acquire);
        if failing > 0 {
            self.inner
                .failing_connects
                .store(failing - 1, Ordering::Release);
            return Err(ChannelError::Unavailable("connection refused".into()));
        }

        let partitions = self.inner.partitions as usize;
        let positions = self
            .inner
            .committed
            .entry((topic.to_string(), group.to_string()))
            .or_insert_with(|| vec![0; partitions])
            .value()
            .clone();

        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            generation: self.inner.generation.load(Ordering::Acquire),
            positions,
            cursor: 0,
        }))
    }

    async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    generation: u64,
    /// Next offset to hand out, per partition.
    positions: Vec<i64>,
    /// Round-robin start so no partition starves.
    cursor: usize,
}

impl MemorySubscription {
    fn check_live(&self) -> Result<(), ChannelError> {
        self.inner.check_up()?;
        if self.inner.generation.load(Ordering::Acquire) != self.generation {
            return Err(ChannelError::Unavailable("connection lost".into()));
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<Delivery> {
        let parts = self.inner.logs.get(&self.topic)?;
        let n = parts.len();
        for i in 0..n {
            let p = (self.cursor + i) % n;
            let offset = self.positions[p];
            if let Some(stored) = parts[p].get(offset as usize) {
                self.positions[p] = offset + 1;
                self.cursor = (p + 1) % n;
                return Some(Delivery {
                    topic: self.topic.clone(),
                    partition: p as i32,
                    offset,
                    key: Some(stored.key.clone()),
                    payload: stored.payload.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let inner = self.inner.clone();
        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_live()?;
            if let Some(delivery) = self.poll() {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), ChannelError> {
        self.check_live()?;
        let partition = delivery.partition as usize;
        let mut committed = self
            .inner
            .committed
            .entry((self.topic.clone(), self.group.clone()))
            .or_insert_with(|| vec![0; self.positions.len()]);
        let slot = committed
            .get_mut(partition)
            .ok_or_else(|| ChannelError::Protocol(format!("no partition {partition}")))?;
        *slot = (*slot).max(delivery.offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "room_events";
    const GROUP: &str = "reservation-service";
    const WAIT: Duration = Duration::from_millis(50);

    async fn drain(sub: &mut Box<dyn Subscription>) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Some(d) = sub.next(WAIT).await.unwrap() {
            out.push(d);
        }
        out
    }

    #[tokio::test]
    async fn publish_then_consume_in_key_order() {
        let ch = InMemoryChannel::default();
        for i in 0..5 {
            ch.publish(TOPIC, "7", Bytes::from(format!("m{i}"))).await.unwrap();
        }
        let mut sub = ch.subscribe(TOPIC, GROUP).await.unwrap();
        let got: Vec<_> = drain(&mut sub).await.into_iter().map(|d| d.payload).collect();
        let want: Vec<_> = (0..5).map(|i| Bytes::from(format!("m{i}"))).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn uncommitted_is_redelivered_after_resubscribe() {
        let ch = InMemoryChannel::default();
        ch.publish(TOPIC, "1", Bytes::from_static(b"a")).await.unwrap();
        ch.publish(TOPIC, "1", Bytes::from_static(b"b")).await.unwrap();

        let mut sub = ch.subscribe(TOPIC, GROUP).await.unwrap();
        let first = sub.next(WAIT).await.unwrap().unwrap();
        sub.commit(&first).await.unwrap();
        let second = sub.next(WAIT).await.unwrap().unwrap();
        assert_eq!(second.payload, Bytes::from_static(b"b"));
        drop(sub);

        let mut sub = ch.subscribe(TOPIC, GROUP).await.unwrap();
        let again = sub.next(WAIT).await.unwrap().unwrap();
        assert_eq!(again, second);
        assert_eq!(ch.lag(TOPIC, GROUP), 1);
        sub.commit(&again).await.unwrap();
        assert_eq!(ch.lag(TOPIC, GROUP), 0);
    }

    #[tokio::test]
    async fn groups_are_independent() {
        let ch = InMemoryChannel::default();
        ch.publish(TOPIC, "1", Bytes::from_static(b"x")).await.unwrap();
        let mut a = ch.subscribe(TOPIC, "a").await.unwrap();
        let d = a.next(WAIT).await.unwrap().unwrap();
        a.commit(&d).await.unwrap();

        let mut b = ch.subscribe(TOPIC, "b").await.unwrap();
        assert!(b.next(WAIT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn next_wakes_on_publish() {
        let ch = InMemoryChannel::default();
        let mut sub = ch.subscribe(TOPIC, GROUP).await.unwrap();
        let publisher = ch.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(TOPIC, "3", Bytes::from_static(b"late")).await.unwrap();
        });
        let got = sub.next(Duration::from_secs(5)).await.unwrap();
        assert_eq!(got.map(|d| d.payload), Some(Bytes::from_static(b"late")));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn empty_topic_times_out_with_none() {
        let ch = InMemoryChannel::default();
        let mut sub = ch.subscribe(TOPIC, GROUP).await.unwrap();
        assert!(sub.next(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn outage_breaks_subscription_and_rejects_publish() {
        let ch = InMemoryChannel::default();
        let mut sub = ch.subscribe(TOPIC, GROUP).await.unwrap();
        ch.set_available(false);

        assert!(sub.next(WAIT).await.unwrap_err().is_unavailable());
        assert!(ch.publish(TOPIC, "1", Bytes::new()).await.unwrap_err().is_unavailable());
        assert!(ch.subscribe(TOPIC, GROUP).await.is_err());

        ch.set_available(true);
        // The old subscription stays broken; a fresh one works.
        assert!(sub.next(WAIT).await.unwrap_err().is_unavailable());
        ch.publish(TOPIC, "1", Bytes::from_static(b"ok")).await.unwrap();
        let mut sub = ch.subscribe(TOPIC, GROUP).await.unwrap();
        assert!(sub.next(WAIT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fail_next_connects_counts_down() {
        let ch = InMemoryChannel::default();
        ch.fail_next_connects(2);
        assert!(ch.subscribe(TOPIC, GROUP).await.is_err());
        assert!(ch.subscribe(TOPIC, GROUP).await.is_err());
        assert!(ch.subscribe(TOPIC, GROUP).await.is_ok());
        assert_eq!(ch.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn shutdown_is_final() {
        let ch = InMemoryChannel::default();
        ch.shutdown().await;
        ch.set_available(true);
        assert!(ch.publish(TOPIC, "1", Bytes::new()).await.unwrap_err().is_unavailable());
    }
}
