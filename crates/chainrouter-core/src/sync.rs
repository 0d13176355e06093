//! Sync engine boundary, plus a windowed reference engine.
//!
//! A [`SyncEngine`] walks a block range and pushes batches into a
//! [`BatchSink`]. Delivery is sequential: the engine awaits each
//! `on_batch` before producing the next, and stops as soon as the sink
//! returns an error.

use async_trait::async_trait;

use crate::error::RouterError;
use crate::types::{Batch, EventFilter, SyncRange, TransactionRecord};

/// Receiver for batches emitted by a sync engine.
#[async_trait]
pub trait BatchSink: Send {
    async fn on_batch(&mut self, batch: Batch) -> Result<(), RouterError>;
}

/// Walks a block range and emits batches of records in block order.
///
/// Contract: `run` resolves once the whole range was delivered and returns
/// the first error from either the engine or the sink. It never calls
/// `on_batch` again after failing.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    async fn run(&self, range: SyncRange, sink: &mut dyn BatchSink) -> Result<(), RouterError>;
}

/// Where [`BlockRangeSync`] reads records from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// All records in `[from, to]` selected by `filter`.
    async fn records(
        &self,
        from: u64,
        to: u64,
        filter: Option<&EventFilter>,
    ) -> Result<Vec<TransactionRecord>, RouterError>;
}

#[async_trait]
impl<T: RecordSource + ?Sized> RecordSource for std::sync::Arc<T> {
    async fn records(
        &self,
        from: u64,
        to: u64,
        filter: Option<&EventFilter>,
    ) -> Result<Vec<TransactionRecord>, RouterError> {
        (**self).records(from, to, filter).await
    }
}

/// Reference sync engine that splits a range into fixed-size block windows.
///
/// Each non-empty window becomes one batch. Empty windows are skipped, so a
/// sink never sees an empty batch from this engine.
pub struct BlockRangeSync<S> {
    source: S,
    batch_size: u64,
}

impl<S: RecordSource> BlockRangeSync<S> {
    /// `batch_size` is the number of blocks per window; it must be non-zero.
    pub fn new(source: S, batch_size: u64) -> Result<Self, RouterError> {
        if batch_size == 0 {
            return Err(RouterError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        Ok(Self { source, batch_size })
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S: RecordSource> SyncEngine for BlockRangeSync<S> {
    async fn run(&self, range: SyncRange, sink: &mut dyn BatchSink) -> Result<(), RouterError> {
        if range.is_empty() {
            tracing::debug!(
                from = range.from_block,
                to = range.to_block,
                "Empty sync range, nothing to do"
            );
            return Ok(());
        }

        let mut start = range.from_block;
        loop {
            let end = start
                .saturating_add(self.batch_size - 1)
                .min(range.to_block);

            let mut records = self
                .source
                .records(start, end, range.filter.as_ref())
                .await
                .map_err(|e| RouterError::Sync(e.to_string()))?;

            tracing::debug!(start, end, records = records.len(), "Sync window fetched");

            if !records.is_empty() {
                records.sort_by_key(|r| (r.block_number, r.log_index));
                sink.on_batch(records).await?;
            }

            if end >= range.to_block {
                break;
            }
            start = end + 1;
        }
        Ok(())
    }
}
