use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::channel::{ChannelError, Delivery, EventChannel, Subscription};
use crate::engine::{Engine, EngineError};
use crate::model::{DecodeError, LifecycleEvent, RoomId};
use crate::observability::*;

/// The store side of a cascade: remove everything that references a room.
/// Must be idempotent; purging an already-empty room returns `Ok(0)`.
#[async_trait]
pub trait CascadeTarget: Send + Sync {
    async fn purge_room(&self, room_id: RoomId) -> Result<usize, EngineError>;
}

#[async_trait]
impl CascadeTarget for Engine {
    async fn purge_room(&self, room_id: RoomId) -> Result<usize, EngineError> {
        self.delete_by_room(room_id).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("undecodable event: {0}")]
    Decode(#[from] DecodeError),
    #[error("store failure: {0}")]
    Store(#[from] EngineError),
}

// ── Retry policy ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reconnect attempts that use `short_delay` before switching to `long_delay`.
    pub short_attempts: u32,
    pub short_delay: Duration,
    pub long_delay: Duration,
    pub connect_timeout: Duration,
    /// How long one `next()` call waits before re-checking for shutdown.
    pub poll_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            short_attempts: 5,
            short_delay: Duration::from_secs(5),
            long_delay: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based). Never gives up.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= self.short_attempts {
            self.short_delay
        } else {
            self.long_delay
        }
    }
}

// ── State machine ────────────────────────────────────────────────

/// Pure transitions; the run loop performs the I/O each state asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    /// `failures` is the number of consecutive failed attempts before this one.
    Connecting { failures: u32 },
    Listening,
    Processing,
    Backoff { attempt: u32, delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerInput {
    Start,
    Connected,
    ConnectFailed,
    Delivered,
    Processed,
    ProcessingFailed,
    ChannelLost,
    TimerElapsed,
}

impl ConsumerState {
    /// Transition table. Inputs that make no sense in a state leave it unchanged.
    pub fn on(&self, input: ConsumerInput, policy: &RetryPolicy) -> ConsumerState {
        use ConsumerInput::*;
        use ConsumerState::*;

        let backoff = |attempt: u32| Backoff {
            attempt,
            delay: policy.delay_for(attempt),
        };

        match (self, input) {
            (Disconnected, Start) => Connecting { failures: 0 },
            (Connecting { .. }, Connected) => Listening,
            (Connecting { failures }, ConnectFailed) => backoff(failures + 1),
            (Backoff { attempt, .. }, TimerElapsed) => Connecting { failures: *attempt },
            (Listening, Delivered) => Processing,
            (Listening, ChannelLost) | (Processing, ChannelLost) => backoff(1),
            (Processing, Processed) => Listening,
            // Same delivery again, subscription kept.
            (Processing, ProcessingFailed) => Processing,
            (state, _) => state.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting { .. } => "connecting",
            ConsumerState::Listening => "listening",
            ConsumerState::Processing => "processing",
            ConsumerState::Backoff { .. } => "backoff",
        }
    }
}

// ── Run loop ─────────────────────────────────────────────────────

pub struct CascadeConsumer {
    channel: Arc<dyn EventChannel>,
    target: Arc<dyn CascadeTarget>,
    topic: String,
    group: String,
    policy: RetryPolicy,
    state_tx: watch::Sender<ConsumerState>,
}

impl CascadeConsumer {
    pub fn new(
        channel: Arc<dyn EventChannel>,
        target: Arc<dyn CascadeTarget>,
        topic: impl Into<String>,
        group: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            channel,
            target,
            topic: topic.into(),
            group: group.into(),
            policy,
            state_tx,
        }
    }

    /// Observe state changes.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state_tx.subscribe()
    }

    fn step(&self, state: &mut ConsumerState, input: ConsumerInput) {
        let next = state.on(input, &self.policy);
        if next != *state {
            tracing::debug!(from = state.name(), to = next.name(), ?input, "cascade consumer transition");
            *state = next;
            self.state_tx.send_replace(state.clone());
        }
    }

    /// Decode one delivery and apply its effect. Only `room_deleted` touches
    /// the store; everything else is acknowledged as is.
    pub async fn handle(&self, delivery: &Delivery) -> Result<LifecycleEvent, CascadeError> {
        let event = LifecycleEvent::decode(&delivery.payload)?;
        if let LifecycleEvent::Deleted { room_id } = event {
            let removed = self.target.purge_room(room_id).await?;
            metrics::counter!(CASCADE_RESERVATIONS_PURGED_TOTAL).increment(removed as u64);
            tracing::info!(%room_id, removed, offset = delivery.offset, "cascade delete applied");
        }
        Ok(event)
    }

    /// Run until `shutdown` flips to true. Shutdown is only honoured between
    /// messages; a delivery in hand is processed (or abandoned uncommitted).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut state = ConsumerState::Disconnected;
        let mut subscription: Option<Box<dyn Subscription>> = None;
        let mut pending: Option<Delivery> = None;

        tracing::info!(topic = %self.topic, group = %self.group, "cascade consumer started");
        self.step(&mut state, ConsumerInput::Start);

        loop {
            if *shutdown.borrow() {
                break;
            }
            match state.clone() {
                ConsumerState::Disconnected => self.step(&mut state, ConsumerInput::Start),

                ConsumerState::Connecting { failures } => {
                    let attempt = tokio::time::timeout(
                        self.policy.connect_timeout,
                        self.channel.subscribe(&self.topic, &self.group),
                    )
                    .await;
                    match attempt {
                        Ok(Ok(sub)) => {
                            subscription = Some(sub);
                            metrics::gauge!(CASCADE_RETRY_ATTEMPT).set(0.0);
                            tracing::info!(after_failures = failures, "cascade consumer connected");
                            self.step(&mut state, ConsumerInput::Connected);
                        }
                        Ok(Err(e)) => {
                            self.channel_error(&e);
                            self.step(&mut state, ConsumerInput::ConnectFailed);
                        }
                        Err(_) => {
                            self.channel_error(&ChannelError::Unavailable("connect timed out".into()));
                            self.step(&mut state, ConsumerInput::ConnectFailed);
                        }
                    }
                }

                ConsumerState::Backoff { attempt, delay } => {
                    metrics::gauge!(CASCADE_RETRY_ATTEMPT).set(attempt as f64);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "cascade consumer backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => self.step(&mut state, ConsumerInput::TimerElapsed),
                        changed = shutdown.changed() => if changed.is_err() { break },
                    }
                }

                ConsumerState::Listening => {
                    let Some(sub) = subscription.as_mut() else {
                        self.step(&mut state, ConsumerInput::ChannelLost);
                        continue;
                    };
                    tokio::select! {
                        biased;
                        changed = shutdown.changed() => if changed.is_err() { break },
                        next = sub.next(self.policy.poll_timeout) => match next {
                            Ok(Some(delivery)) => {
                                pending = Some(delivery);
                                self.step(&mut state, ConsumerInput::Delivered);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                self.channel_error(&e);
                                subscription = None;
                                self.step(&mut state, ConsumerInput::ChannelLost);
                            }
                        }
                    }
                }

                ConsumerState::Processing => {
                    let Some(delivery) = pending.clone() else {
                        self.step(&mut state, ConsumerInput::Processed);
                        continue;
                    };
                    match self.handle(&delivery).await {
                        Ok(event) => {
                            let committed = match subscription.as_mut() {
                                Some(sub) => sub.commit(&delivery).await,
                                None => Err(ChannelError::Unavailable("no subscription".into())),
                            };
                            pending = None;
                            match committed {
                                Ok(()) => {
                                    metrics::counter!(CASCADE_PROCESSED_TOTAL, "event_type" => event.event_type().to_string())
                                        .increment(1);
                                    self.step(&mut state, ConsumerInput::Processed);
                                }
                                Err(e) => {
                                    // Effect applied but not committed: it will be
                                    // redelivered after reconnect, which is harmless.
                                    self.channel_error(&e);
                                    subscription = None;
                                    self.step(&mut state, ConsumerInput::ChannelLost);
                                }
                            }
                        }
                        Err(e) => {
                            metrics::counter!(CASCADE_PROCESSING_ERRORS_TOTAL).increment(1);
                            tracing::error!(
                                error = %e,
                                partition = delivery.partition,
                                offset = delivery.offset,
                                retry_ms = self.policy.short_delay.as_millis() as u64,
                                "cascade processing failed, retrying"
                            );
                            self.step(&mut state, ConsumerInput::ProcessingFailed);
                            tokio::select! {
                                _ = tokio::time::sleep(self.policy.short_delay) => {}
                                changed = shutdown.changed() => if changed.is_err() { break },
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(state = state.name(), "cascade consumer stopped");
    }

    fn channel_error(&self, e: &ChannelError) {
        let kind = if e.is_unavailable() { "unavailable" } else { "fatal" };
        metrics::counter!(CASCADE_CHANNEL_ERRORS_TOTAL, "kind" => kind).increment(1);
        if e.is_unavailable() {
            tracing::warn!(error = %e, topic = %self.topic, "cascade consumer lost the channel");
        } else {
            // Rejected or protocol errors do not clear on their own.
            tracing::error!(error = %e, topic = %self.topic, "cascade consumer channel error");
        }
    }
}
