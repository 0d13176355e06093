//! In-memory ledger.
//!
//! Serves head heights, block headers, and transaction records from RAM.
//! Useful for tests, simulations, and wiring checks without a node.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::{ChainClient, ChainClientFactory};
use crate::error::RouterError;
use crate::sync::RecordSource;
use crate::types::{BlockRecord, EventFilter, TransactionRecord};

#[derive(Default)]
struct Ledger {
    blocks: Vec<BlockRecord>,
    records: Vec<TransactionRecord>,
    head_error: Option<String>,
    head_override: Option<u64>,
}

/// A growable chain whose blocks are numbered from 1.
#[derive(Default)]
pub struct MemoryChain {
    ledger: Mutex<Ledger>,
    head_calls: AtomicUsize,
    block_calls: AtomicUsize,
    record_calls: AtomicUsize,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mine a block carrying `tx_count` records and return its number.
    pub fn push_block(&self, tx_count: u32) -> u64 {
        let mut ledger = self.ledger.lock().unwrap();
        let number = ledger.blocks.len() as u64 + 1;
        let parent_hash = ledger
            .blocks
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| format!("0x{:064x}", 0));

        ledger.blocks.push(BlockRecord {
            number,
            hash: format!("0x{number:064x}"),
            parent_hash,
            timestamp: chrono::Utc::now().timestamp(),
            tx_count,
        });
        for i in 0..tx_count {
            ledger.records.push(TransactionRecord {
                log_index: i,
                ..TransactionRecord::at_block(number, format!("0x{number:x}{i:04x}"))
            });
        }
        number
    }

    /// Mine a block carrying exactly `records`; their block numbers are
    /// rewritten to the new block.
    pub fn push_records(&self, records: Vec<TransactionRecord>) -> u64 {
        let number = self.push_block(0);
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(block) = ledger.blocks.last_mut() {
            block.tx_count = records.len() as u32;
        }
        ledger.records.extend(records.into_iter().map(|mut r| {
            r.block_number = number;
            r
        }));
        number
    }

    /// Make every head query fail with `reason` until cleared with `None`.
    pub fn set_head_error(&self, reason: Option<&str>) {
        self.ledger.lock().unwrap().head_error = reason.map(str::to_string);
    }

    /// Report `height` as the head regardless of the stored blocks.
    pub fn set_head_override(&self, height: Option<u64>) {
        self.ledger.lock().unwrap().head_override = height;
    }

    pub fn height(&self) -> u64 {
        self.ledger.lock().unwrap().blocks.len() as u64
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn record_calls(&self) -> usize {
        self.record_calls.load(Ordering::SeqCst)
    }

    /// A factory that always hands out this chain.
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ChainClientFactory> {
        let chain = Arc::clone(self);
        Arc::new(move || Arc::clone(&chain) as Arc<dyn ChainClient>)
    }
}

fn filter_matches(filter: &EventFilter, record: &TransactionRecord) -> bool {
    let address_ok = filter.addresses.is_empty()
        || filter
            .addresses
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&record.address));
    let topic_ok = filter.topics.is_empty()
        || record
            .event
            .as_deref()
            .map_or(false, |e| filter.topics.iter().any(|t| t == e));
    address_ok && topic_ok
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn head_height(&self) -> Result<u64, RouterError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let ledger = self.ledger.lock().unwrap();
        if let Some(reason) = &ledger.head_error {
            return Err(RouterError::Rpc(reason.clone()));
        }
        Ok(ledger
            .head_override
            .unwrap_or(ledger.blocks.len() as u64))
    }

    async fn block(&self, height: u64) -> Result<Option<BlockRecord>, RouterError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let ledger = self.ledger.lock().unwrap();
        Ok(height
            .checked_sub(1)
            .and_then(|i| ledger.blocks.get(i as usize))
            .cloned())
    }
}

#[async_trait]
impl RecordSource for MemoryChain {
    async fn records(
        &self,
        from: u64,
        to: u64,
        filter: Option<&EventFilter>,
    ) -> Result<Vec<TransactionRecord>, RouterError> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger
            .records
            .iter()
            .filter(|r| (from..=to).contains(&r.block_number))
            .filter(|r| filter.map_or(true, |f| filter_matches(f, r)))
            .cloned()
            .collect())
    }
}
