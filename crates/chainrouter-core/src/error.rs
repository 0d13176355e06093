//! Error types for the event router.

use thiserror::Error;

/// Errors that can occur while routing events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The chain head could not be retrieved, or the node reported height 0.
    #[error("Chain unavailable: {reason}")]
    ChainUnavailable { reason: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    /// Surfaced verbatim from the sync engine.
    #[error("Sync error: {0}")]
    Sync(String),

    /// A handler aborted the pipeline, returned an error, or panicked.
    #[error("Handler error at offset {index}: {reason}")]
    Handler { index: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl RouterError {
    pub fn handler(index: usize, reason: impl Into<String>) -> Self {
        Self::Handler {
            index,
            reason: reason.into(),
        }
    }

    pub fn chain_unavailable(reason: impl Into<String>) -> Self {
        Self::ChainUnavailable {
            reason: reason.into(),
        }
    }

    /// Returns `true` if a registered handler produced this error.
    pub fn is_handler(&self) -> bool {
        matches!(self, Self::Handler { .. })
    }

    /// Returns `true` if the head query failed during startup.
    pub fn is_chain_unavailable(&self) -> bool {
        matches!(self, Self::ChainUnavailable { .. })
    }
}
