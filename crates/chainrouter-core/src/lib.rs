//! chainrouter-core — catch-up-then-live event routing with a middleware pipeline.
//!
//! # Architecture
//!
//! ```text
//! EventRouter
//!     ├── ChainClientFactory  (head height, block headers)
//!     ├── SyncEngine          (block range → ordered batches)
//!     ├── HandlerRegistry     (user middleware, insertion order)
//!     │     └── Pipeline      (one run per batch: next / end(ok) / end(err))
//!     └── PollLoop            (live head polling, skip-if-busy)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainrouter_core::{handler_fn, Batch, BlockRangeSync, EventRouter, MemoryChain,
//!     RouterConfig, StartParams};
//!
//! # async fn run() -> Result<(), chainrouter_core::RouterError> {
//! let chain = Arc::new(MemoryChain::new());
//! let sync = BlockRangeSync::new(Arc::clone(&chain), 500)?;
//! let router = EventRouter::new(RouterConfig::default(), chain.factory(), Arc::new(sync));
//!
//! router.register(handler_fn(|txns: Arc<Batch>, next, _end| async move {
//!     println!("{} transactions", txns.len());
//!     Ok(next.call())
//! }));
//!
//! router.start(StartParams::from_block(1)).await?;
//! // ... later
//! router.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod poller;
pub mod router;
pub mod sync;
pub mod types;

pub use client::{ChainClient, ChainClientFactory};
pub use config::{LiveWatermark, RouterBuilder, RouterConfig};
pub use error::RouterError;
pub use memory::MemoryChain;
pub use pipeline::{handler_fn, End, Handler, HandlerRegistry, Next, Pipeline, Step};
pub use poller::{BlockListener, PollConfig, PollLoop, Subscription, TickOutcome};
pub use router::{EventRouter, StartParams};
pub use sync::{BatchSink, BlockRangeSync, RecordSource, SyncEngine};
pub use types::{Batch, BlockRecord, EventFilter, RouterState, SyncRange, TransactionRecord};
