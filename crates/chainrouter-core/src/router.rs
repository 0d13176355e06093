//! The event router — drives catch-up and live phases.
//!
//! # Phase 1: CATCH-UP
//! Read the chain head, sync `[from_block, head]`, and push every batch
//! through the handler pipeline, one at a time. Any failure rejects
//! `start()`.
//!
//! # Phase 2: LIVE
//! Arm a [`PollLoop`] with the watermark at `head + 1`. Each new head block
//! triggers a sync over `[watermark, block]` whose batches go through the
//! same pipeline. Failures here are logged by the poller and never reach
//! the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::{require_head, ChainClientFactory};
use crate::config::{LiveWatermark, RouterConfig};
use crate::error::RouterError;
use crate::pipeline::{Handler, HandlerRegistry, Pipeline};
use crate::poller::{BlockListener, PollLoop, Subscription};
use crate::sync::{BatchSink, SyncEngine};
use crate::types::{Batch, BlockRecord, EventFilter, RouterState, SyncRange};

/// Arguments to [`EventRouter::start`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartParams {
    /// First block to sync (inclusive).
    pub from_block: u64,
    /// Handed to the sync engine as [`SyncRange::requested_to`] on the
    /// catch-up range. Catch-up still runs to the head and live polling is
    /// armed either way.
    pub to_block: Option<u64>,
    /// Forwarded to the sync engine.
    pub filter: Option<EventFilter>,
    /// Forwarded to the sync engine.
    pub options: Option<serde_json::Value>,
}

impl StartParams {
    pub fn from_block(block: u64) -> Self {
        Self {
            from_block: block,
            ..Default::default()
        }
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }
}

struct Lifecycle {
    state: RouterState,
    subscription: Option<Subscription>,
}

#[derive(Default)]
struct SyncScope {
    filter: Option<EventFilter>,
    options: Option<serde_json::Value>,
}

/// State shared between the router and its live-phase listener.
struct Shared {
    config: RouterConfig,
    factory: Arc<dyn ChainClientFactory>,
    sync: Arc<dyn SyncEngine>,
    handlers: RwLock<HandlerRegistry<Batch>>,
    watermark: AtomicU64,
    scope: Mutex<SyncScope>,
    lifecycle: Mutex<Lifecycle>,
    /// Held for the duration of each pipeline run.
    dispatching: tokio::sync::Mutex<()>,
}

impl Shared {
    async fn dispatch(&self, batch: Batch) -> Result<(), RouterError> {
        let _running = self.dispatching.lock().await;
        let chain = self.handlers.read().unwrap().snapshot();
        Pipeline::new(chain, batch).run().await
    }

    /// Raise the watermark to `block`; lower values are ignored.
    fn advance_watermark(&self, block: u64) {
        let prev = self.watermark.fetch_max(block, Ordering::SeqCst);
        if block > prev {
            tracing::debug!(from = prev, to = block, "Watermark advanced");
        }
    }

    fn state(&self) -> RouterState {
        self.lifecycle.lock().unwrap().state
    }

    fn set_state(&self, state: RouterState) {
        self.lifecycle.lock().unwrap().state = state;
    }

    /// Cancel the poll timer, if any, and mark the router stopped.
    fn halt(&self) -> bool {
        let mut life = self.lifecycle.lock().unwrap();
        life.state = RouterState::Stopped;
        match life.subscription.take() {
            Some(mut sub) => {
                sub.unsubscribe();
                true
            }
            None => false,
        }
    }
}

/// Feeds catch-up batches into the pipeline.
struct CatchUpSink<'a> {
    shared: &'a Shared,
}

#[async_trait]
impl BatchSink for CatchUpSink<'_> {
    async fn on_batch(&mut self, batch: Batch) -> Result<(), RouterError> {
        tracing::debug!(records = batch.len(), "Router getting events from sync");
        self.shared.dispatch(batch).await
    }
}

/// Feeds live batches into the pipeline, moving the watermark as it goes.
struct LiveSink<'a> {
    shared: &'a Shared,
}

#[async_trait]
impl BatchSink for LiveSink<'_> {
    async fn on_batch(&mut self, batch: Batch) -> Result<(), RouterError> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        if self.shared.config.live_watermark == LiveWatermark::FirstRecord {
            self.shared.advance_watermark(first.block_number);
        }
        self.shared.dispatch(batch).await.map_err(|e| {
            tracing::error!(error = %e, "Problem processing live transactions");
            e
        })
    }
}

/// Poll-loop callback: incremental sync from the watermark to the new block.
struct LiveListener {
    shared: Arc<Shared>,
}

#[async_trait]
impl BlockListener for LiveListener {
    async fn on_new_block(&self, block: BlockRecord) -> Result<(), RouterError> {
        let shared = &self.shared;
        let range = {
            let scope = shared.scope.lock().unwrap();
            SyncRange {
                from_block: shared.watermark.load(Ordering::SeqCst),
                to_block: block.number,
                requested_to: None,
                filter: scope.filter.clone(),
                options: scope.options.clone(),
            }
        };
        let last = range.to_block;

        tracing::debug!(
            chain = %shared.config.chain,
            from = range.from_block,
            to = last,
            "Pulling live batch"
        );

        let mut sink = LiveSink { shared };
        shared.sync.run(range, &mut sink).await?;

        if shared.config.live_watermark == LiveWatermark::PastBlock {
            shared.advance_watermark(last.saturating_add(1));
        }
        Ok(())
    }
}

/// Catch-up-then-poll event router.
///
/// Register handlers with [`register`](Self::register), then call
/// [`start`](Self::start) once. `start` resolves when the historical range
/// has been processed and live polling is armed.
pub struct EventRouter {
    shared: Arc<Shared>,
}

impl EventRouter {
    pub fn new(
        config: RouterConfig,
        factory: Arc<dyn ChainClientFactory>,
        sync: Arc<dyn SyncEngine>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                sync,
                handlers: RwLock::new(HandlerRegistry::new()),
                watermark: AtomicU64::new(0),
                scope: Mutex::new(SyncScope::default()),
                lifecycle: Mutex::new(Lifecycle {
                    state: RouterState::Init,
                    subscription: None,
                }),
                dispatching: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Append a handler to the pipeline. `None` is ignored.
    ///
    /// Batches already in flight keep the chain they started with.
    pub fn register(&self, handler: impl Into<Option<Arc<dyn Handler<Batch>>>>) {
        self.shared.handlers.write().unwrap().register(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.shared.handlers.read().unwrap().len()
    }

    pub fn state(&self) -> RouterState {
        self.shared.state()
    }

    /// Next block the live phase will sync from.
    pub fn watermark(&self) -> u64 {
        self.shared.watermark.load(Ordering::SeqCst)
    }

    /// Catch up over the historical range, then arm live polling.
    ///
    /// Rejects with [`RouterError::ChainUnavailable`] if the head cannot be
    /// read, or with the first sync or handler error hit during catch-up.
    /// Not re-entrant: call it once per router.
    pub async fn start(&self, params: StartParams) -> Result<(), RouterError> {
        let result = self.run_catch_up(params).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Event router failed to start");
            let mut life = self.shared.lifecycle.lock().unwrap();
            if life.state != RouterState::Stopped {
                life.state = RouterState::Failed;
            }
        }
        result
    }

    async fn run_catch_up(&self, params: StartParams) -> Result<(), RouterError> {
        let shared = &self.shared;
        shared.config.validate()?;

        tracing::debug!(
            chain = %shared.config.chain,
            from_block = params.from_block,
            "Starting event router"
        );
        shared.set_state(RouterState::Syncing);

        let client = shared.factory.client();
        let head = require_head(client.as_ref()).await?;

        {
            let mut scope = shared.scope.lock().unwrap();
            scope.filter = params.filter.clone();
            scope.options = params.options.clone();
        }

        tracing::debug!(from = params.from_block, to = head, "First synchronizing between blocks");
        let range = SyncRange {
            from_block: params.from_block,
            to_block: head,
            requested_to: params.to_block,
            filter: params.filter,
            options: params.options,
        };
        shared.sync.run(range, &mut CatchUpSink { shared }).await?;

        shared.advance_watermark(head.saturating_add(1));

        tracing::info!(
            head,
            watermark = self.watermark(),
            "Synchronization complete. Starting event live stream"
        );

        let listener = Arc::new(LiveListener {
            shared: Arc::clone(shared),
        });
        let poller = PollLoop::new(shared.config.poll_config(), Arc::clone(&shared.factory), listener)
            .with_last_seen(head);

        let mut life = shared.lifecycle.lock().unwrap();
        if life.state == RouterState::Stopped {
            tracing::info!("Router stopped during synchronization, live stream not started");
            return Ok(());
        }
        life.subscription = Some(poller.subscribe()?);
        life.state = RouterState::Live;
        Ok(())
    }

    /// Stop live polling. Safe to call at any time, any number of times.
    ///
    /// Work already in progress (a catch-up sync or a poll tick) runs to
    /// completion; nothing new is scheduled afterwards.
    pub async fn stop(&self) {
        if self.shared.halt() {
            tracing::debug!("Stopping router and all subscriptions");
        }
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.shared.halt();
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
