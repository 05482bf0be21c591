//! Capability traits supplied by the embedder.
//!
//! The core is generic over the backend client handle `C` and assumes nothing
//! about it beyond what these traits demand. Retries, failover, and timeouts
//! are the [`ClientPool`](crate::client::ClientPool)'s responsibility; a
//! fetcher implementation only talks to the single client it is handed.

use crate::{error::BoxedError, types::Block};
use async_trait::async_trait;

/// Outcome of a single block fetch.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// The block exists and was retrieved.
    Block(Block),
    /// The chain intentionally produced no block at this height (chains with
    /// non-contiguous numbering). The poller consumes this by advancing to the
    /// next height.
    Skipped,
}

/// Block retrieval capability.
#[async_trait]
pub trait BlockFetcher<C>: Send + Sync {
    /// Cheap, best-effort predicate: is `block_num` expected to exist on the
    /// chain yet? Used to bound an optimistic prefetch batch; a `false` for
    /// one height implies `false` for every higher height.
    fn is_block_available(&self, block_num: u64) -> bool;

    /// Fetches `block_num` through `client`.
    ///
    /// Must block while the node is momentarily behind but the height is
    /// expected to exist; may return [`Fetched::Skipped`] only for heights the
    /// chain genuinely numbered past.
    async fn fetch(&self, client: C, block_num: u64) -> Result<Fetched, BoxedError>;
}

/// Downstream sink for the fork-resolved, irreversibility-aware block stream.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    /// Called once before the main loop starts.
    async fn init(&self);

    /// Called in strictly increasing, ancestor-first order for every emitted
    /// block at or above the start gate. At-most-once per block id across the
    /// process lifetime; an error is fatal to the poller.
    async fn handle(&self, block: &Block) -> Result<(), BoxedError>;
}
