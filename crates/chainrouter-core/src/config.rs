//! Router configuration and fluent builder.
//!
//! # Example
//!
//! ```rust
//! use chainrouter_core::config::{LiveWatermark, RouterBuilder};
//!
//! let config = RouterBuilder::new()
//!     .chain("polygon")
//!     .poll_interval_ms(2_000)
//!     .live_watermark(LiveWatermark::PastBlock)
//!     .build_config();
//! assert_eq!(config.poll_interval_ms, 2_000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;
use crate::poller::{PollConfig, DEFAULT_POLL_INTERVAL};

/// How the watermark moves after a live-phase sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveWatermark {
    /// Move to the block number of the first record of each non-empty batch.
    /// The next sync restarts at that block, so its remaining records can be
    /// delivered again.
    #[default]
    FirstRecord,
    /// Move past the polled block once its range synced without error.
    PastBlock,
}

/// Configuration for an [`EventRouter`](crate::router::EventRouter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Chain slug, used in log fields only.
    pub chain: String,
    /// Live-phase polling period (milliseconds).
    pub poll_interval_ms: u64,
    pub live_watermark: LiveWatermark,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            chain: "ethereum".into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            live_watermark: LiveWatermark::default(),
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.poll_interval_ms == 0 {
            return Err(RouterError::InvalidConfig(
                "poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// Fluent builder for `RouterConfig`.
#[derive(Default)]
pub struct RouterBuilder {
    config: RouterConfig,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn live_watermark(mut self, policy: LiveWatermark) -> Self {
        self.config.live_watermark = policy;
        self
    }

    pub fn build_config(self) -> RouterConfig {
        self.config
    }
}
