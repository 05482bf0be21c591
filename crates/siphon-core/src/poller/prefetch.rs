//! Optimistic block prefetching.
//!
//! Hides fetch latency behind parallelism: a campaign fetches a window of
//! upcoming heights concurrently through the client pool and buffers results
//! by height; the state machine polls for the one height it needs next.
//!
//! # Invariants
//!
//! - At most one campaign is in flight per prefetcher; the "campaign running"
//!   check and the `fetching` transition happen under one lock acquisition.
//! - A campaign is never cancelled by a new request; late requests observe
//!   whatever the campaign buffered and wait otherwise.

use crate::{
    client::ClientPool,
    error::PollerError,
    fetch::{BlockFetcher, Fetched},
    retry::retry,
    shutdown::Shutdown,
    types::BlockItem,
};
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Bounded parallelism of one prefetch campaign.
const FETCH_PARALLELISM: usize = 10;

/// How often a pending request re-polls the buffer.
const BUFFER_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct BufferState {
    items: HashMap<u64, BlockItem>,
    fetching: bool,
}

/// Height-keyed buffer of optimistically fetched blocks.
pub struct Prefetcher<C, F> {
    state: Mutex<BufferState>,
    pool: Arc<ClientPool<C>>,
    fetcher: Arc<F>,
    fetch_block_retry_count: u64,
    shutdown: Shutdown,
}

impl<C, F> Prefetcher<C, F>
where
    C: Clone + Send + Sync + 'static,
    F: BlockFetcher<C> + 'static,
{
    #[must_use]
    pub fn new(
        pool: Arc<ClientPool<C>>,
        fetcher: Arc<F>,
        fetch_block_retry_count: u64,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            pool,
            fetcher,
            fetch_block_retry_count,
            shutdown,
        }
    }

    /// Drops every buffered item (used when a hash pivot makes the running
    /// campaign stale).
    pub fn clear(&self) {
        self.state.lock().items.clear();
    }

    /// Requests the block at `block_num`, prefetching up to `batch_size`
    /// heights ahead.
    ///
    /// The returned channel yields exactly one item, or closes without a value
    /// on shutdown.
    pub fn request_block(
        self: &Arc<Self>,
        block_num: u64,
        batch_size: usize,
    ) -> oneshot::Receiver<BlockItem> {
        debug!(block_num, "requesting block");
        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                if this.shutdown.is_terminating() {
                    info!(block_num, "prefetcher terminating, abandoning block request");
                    return;
                }

                let (found, start_campaign) = {
                    let mut state = this.state.lock();
                    match state.items.get(&block_num) {
                        Some(item) => (Some(item.clone()), false),
                        None => {
                            let start = !state.fetching;
                            if start {
                                state.fetching = true;
                            }
                            (None, start)
                        }
                    }
                };

                if let Some(item) = found {
                    debug!(block_num, "block was optimistically polled");
                    let _ = tx.send(item);
                    return;
                }

                if start_campaign {
                    let campaign = Arc::clone(&this);
                    tokio::spawn(async move {
                        if let Err(err) = campaign.load_next(block_num, batch_size).await {
                            error!(%err, "optimistic block fetching failed");
                            campaign.shutdown.shutdown(Some(err));
                        }
                    });
                }

                debug!(block_num, "waiting for block to be fetched");
                tokio::time::sleep(BUFFER_POLL_INTERVAL).await;
            }
        });

        rx
    }

    /// Runs one prefetch campaign starting at `requested_block`.
    ///
    /// The caller has already flipped `fetching` to true; this method flips it
    /// back when the campaign drains, error or not.
    async fn load_next(&self, requested_block: u64, batch_size: usize) -> Result<(), PollerError> {
        self.state.lock().items.clear();

        let mut heights = Vec::with_capacity(batch_size);
        for i in 0..batch_size as u64 {
            let block_num = requested_block + i;
            if !self.fetcher.is_block_available(block_num) {
                // heights above an unavailable one are unavailable too
                break;
            }
            debug!(block_num, "optimistically fetching block");
            heights.push(block_num);
        }

        if heights.is_empty() {
            // nothing is available: issue the one blocking fetch and let the
            // fetcher wait for the height to appear
            heights.push(requested_block);
        }

        let result = futures::stream::iter(heights)
            .map(|block_num| self.fetch_one(block_num))
            .buffer_unordered(FETCH_PARALLELISM)
            .try_for_each(|item| {
                self.state.lock().items.insert(item.block_number, item);
                futures::future::ready(Ok(()))
            })
            .await;

        self.state.lock().fetching = false;
        result
    }

    async fn fetch_one(&self, block_num: u64) -> Result<BlockItem, PollerError> {
        let fetched = retry(self.fetch_block_retry_count, &self.shutdown, || {
            let fetcher = Arc::clone(&self.fetcher);
            self.pool.with_client(move |client| {
                let fetcher = Arc::clone(&fetcher);
                async move { fetcher.fetch(client, block_num).await }
            })
        })
        .await
        .map_err(|source| PollerError::FetchBlock { num: block_num, source })?;

        Ok(match fetched {
            Fetched::Block(block) => BlockItem::resolved(block_num, block),
            Fetched::Skipped => BlockItem::skipped(block_num),
        })
    }
}
