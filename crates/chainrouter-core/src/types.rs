//! Shared types for the routing pipeline.

use serde::{Deserialize, Serialize};

// ─── TransactionRecord ────────────────────────────────────────────────────────

/// A single event-bearing transaction discovered by the sync engine.
///
/// The router itself only ever looks at `block_number`; everything else is
/// carried through to handlers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Block the record was mined in.
    pub block_number: u64,
    /// Transaction hash (`0x…`).
    pub tx_hash: String,
    /// Log index within the block.
    pub log_index: u32,
    /// Contract address that emitted the event.
    pub address: String,
    /// Event name or signature, if the sync engine decoded one.
    pub event: Option<String>,
    /// Decoded fields as JSON.
    pub fields_json: serde_json::Value,
}

impl TransactionRecord {
    /// A bare record at `block_number` with no decoded payload.
    pub fn at_block(block_number: u64, tx_hash: impl Into<String>) -> Self {
        Self {
            block_number,
            tx_hash: tx_hash.into(),
            log_index: 0,
            address: String::new(),
            event: None,
            fields_json: serde_json::Value::Null,
        }
    }
}

/// An ordered sequence of records, in chain order.
pub type Batch = Vec<TransactionRecord>;

// ─── BlockRecord ──────────────────────────────────────────────────────────────

/// A minimal block header, as returned by the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    /// Unix timestamp (seconds since epoch).
    pub timestamp: i64,
    pub tx_count: u32,
}

// ─── EventFilter ─────────────────────────────────────────────────────────────

/// Event selection criteria handed to the sync engine as-is.
///
/// The router never interprets the filter; matching is the sync engine's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Contract addresses to watch (empty = all).
    pub addresses: Vec<String>,
    /// Event names or topic hashes to watch (empty = all).
    pub topics: Vec<String>,
}

impl EventFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add an event name/topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }
}

// ─── SyncRange ────────────────────────────────────────────────────────────────

/// An inclusive block range plus the pass-through parameters for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRange {
    pub from_block: u64,
    pub to_block: u64,
    /// End block the caller asked for at start, passed through untouched.
    /// `to_block` is always the chain head regardless.
    pub requested_to: Option<u64>,
    pub filter: Option<EventFilter>,
    pub options: Option<serde_json::Value>,
}

impl SyncRange {
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..Default::default()
        }
    }

    /// Returns `true` if the range contains no blocks (`to < from`).
    pub fn is_empty(&self) -> bool {
        self.to_block < self.from_block
    }
}

// ─── RouterState ──────────────────────────────────────────────────────────────

/// Lifecycle of an [`EventRouter`](crate::router::EventRouter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterState {
    /// Constructed, `start()` not yet called.
    Init,
    /// Catching up over the historical range.
    Syncing,
    /// Polling for new blocks.
    Live,
    /// `stop()` was called, or a bounded run finished.
    Stopped,
    /// `start()` rejected.
    Failed,
}

impl std::fmt::Display for RouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Syncing => write!(f, "syncing"),
            Self::Live => write!(f, "live"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_range_empty_when_inverted() {
        assert!(SyncRange::new(11, 10).is_empty());
        assert!(!SyncRange::new(10, 10).is_empty());
    }

    #[test]
    fn event_filter_builder() {
        let f = EventFilter::address("0xAbC").topic("Transfer");
        assert_eq!(f.addresses, vec!["0xAbC".to_string()]);
        assert_eq!(f.topics, vec!["Transfer".to_string()]);
    }

    #[test]
    fn record_serializes_block_number() {
        let r = TransactionRecord::at_block(42, "0xabc");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["block_number"], 42);
        assert_eq!(v["tx_hash"], "0xabc");
    }

    #[test]
    fn state_display() {
        assert_eq!(RouterState::Syncing.to_string(), "syncing");
        assert_eq!(RouterState::Live.to_string(), "live");
    }
}
