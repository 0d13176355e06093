//! Chain client boundary.
//!
//! The router only needs two calls from a node: the current head height and
//! a block header by height. How the client reaches the node is up to the
//! implementation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RouterError;
use crate::types::BlockRecord;

/// Read access to a ledger's head and block headers.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block height.
    async fn head_height(&self) -> Result<u64, RouterError>;

    /// Block header at `height`, or `None` if the node does not have it yet.
    async fn block(&self, height: u64) -> Result<Option<BlockRecord>, RouterError>;
}

/// Produces chain clients on demand.
///
/// A fresh client is requested for every head-query round so that
/// implementations can rotate endpoints or rebuild broken connections.
pub trait ChainClientFactory: Send + Sync {
    fn client(&self) -> Arc<dyn ChainClient>;
}

impl<F> ChainClientFactory for F
where
    F: Fn() -> Arc<dyn ChainClient> + Send + Sync,
{
    fn client(&self) -> Arc<dyn ChainClient> {
        self()
    }
}

/// Fetch the head height, treating errors and a zero height as
/// [`RouterError::ChainUnavailable`].
pub async fn require_head(client: &dyn ChainClient) -> Result<u64, RouterError> {
    match client.head_height().await {
        Ok(0) => Err(RouterError::chain_unavailable(
            "could not retrieve latest block",
        )),
        Ok(head) => Ok(head),
        Err(e) => Err(RouterError::chain_unavailable(e.to_string())),
    }
}
