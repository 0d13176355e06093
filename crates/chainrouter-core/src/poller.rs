//! Live-phase block poller.
//!
//! Every `interval` the poller asks the chain for its head. When the head
//! moved, it fetches that block and hands it to a [`BlockListener`].
//!
//! Ticks never overlap: a tick that fires while the previous one is still
//! working is dropped, not queued. All failures inside a tick are logged and
//! swallowed so a single bad block cannot stop the timer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::client::ChainClientFactory;
use crate::error::RouterError;
use crate::types::BlockRecord;

/// Default live polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Time between head checks.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Receives each newly observed head block.
#[async_trait]
pub trait BlockListener: Send + Sync {
    async fn on_new_block(&self, block: BlockRecord) -> Result<(), RouterError>;
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick was still running; nothing was queried.
    Busy,
    /// The head has not moved since the last delivered block.
    Unchanged,
    /// The node reported a new head but could not return the block yet.
    Missing,
    /// The listener received this block number.
    Delivered(u64),
    /// A chain query or the listener failed; the error was logged.
    Failed,
}

#[derive(Debug, Default)]
struct PollState {
    last_seen: Option<u64>,
}

/// Head poller with skip-if-busy semantics.
#[derive(Clone)]
pub struct PollLoop {
    config: PollConfig,
    factory: Arc<dyn ChainClientFactory>,
    listener: Arc<dyn BlockListener>,
    state: Arc<Mutex<PollState>>,
}

impl PollLoop {
    pub fn new(
        config: PollConfig,
        factory: Arc<dyn ChainClientFactory>,
        listener: Arc<dyn BlockListener>,
    ) -> Self {
        Self {
            config,
            factory,
            listener,
            state: Arc::new(Mutex::new(PollState::default())),
        }
    }

    /// Treat `height` as already delivered, so the first tick only fires the
    /// listener once the head moves past it.
    pub fn with_last_seen(mut self, height: u64) -> Self {
        self.state = Arc::new(Mutex::new(PollState {
            last_seen: Some(height),
        }));
        self
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Run one guarded head check now.
    pub async fn tick(&self) -> TickOutcome {
        match self.try_claim() {
            Some(guard) => self.poll(guard).await,
            None => TickOutcome::Busy,
        }
    }

    /// The busy guard shared by `tick` and the subscription timer.
    fn try_claim(&self) -> Option<OwnedMutexGuard<PollState>> {
        let guard = Arc::clone(&self.state).try_lock_owned().ok();
        if guard.is_none() {
            tracing::debug!("Previous poll still running, skipping tick");
        }
        guard
    }

    /// Start ticking every `interval`. The first tick fires one interval
    /// from now.
    pub fn subscribe(&self) -> Result<Subscription, RouterError> {
        let period = self.config.interval;
        if period.is_zero() {
            return Err(RouterError::InvalidConfig(
                "poll interval must be non-zero".into(),
            ));
        }

        tracing::info!(interval_ms = period.as_millis() as u64, "Using polling to get new blocks");

        let poller = self.clone();
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                if let Some(guard) = poller.try_claim() {
                    // Spawned so that unsubscribing never cuts a tick short.
                    let worker = poller.clone();
                    tokio::spawn(async move {
                        worker.poll(guard).await;
                    });
                }
            }
        });

        Ok(Subscription {
            handle: Some(handle),
        })
    }

    async fn poll(&self, mut state: OwnedMutexGuard<PollState>) -> TickOutcome {
        let client = self.factory.client();

        let head = match client.head_height().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to query chain head");
                return TickOutcome::Failed;
            }
        };

        tracing::debug!(last_seen = ?state.last_seen, head, "Checking for new blocks");
        if state.last_seen == Some(head) {
            return TickOutcome::Unchanged;
        }

        let block = match client.block(head).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                tracing::debug!(head, "Head block not available yet");
                return TickOutcome::Missing;
            }
            Err(e) => {
                tracing::warn!(head, error = %e, "Failed to fetch head block");
                return TickOutcome::Failed;
            }
        };

        let number = block.number;
        tracing::debug!(number, "Got block from live poller");
        state.last_seen = Some(head);

        let delivered = AssertUnwindSafe(self.listener.on_new_block(block))
            .catch_unwind()
            .await;
        match delivered {
            Ok(Ok(())) => TickOutcome::Delivered(number),
            Ok(Err(e)) => {
                tracing::error!(number, error = %e, "Problem calling block listener");
                TickOutcome::Failed
            }
            Err(_) => {
                tracing::error!(number, "Block listener panicked");
                TickOutcome::Failed
            }
        }
    }
}

/// Handle to a running poll timer.
///
/// Dropping the handle stops the timer as well.
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop scheduling ticks. A tick already in progress runs to completion.
    pub fn unsubscribe(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
