//! The block poller: drives fetching, fork resolution, emission, and cursor
//! persistence.
//!
//! # Control Flow
//!
//! ```text
//! ┌────────────────┐   request_block    ┌──────────────────┐
//! │   BlockPoller  │ ─────────────────► │    Prefetcher    │
//! │  (state machine│ ◄───────────────── │ (height-keyed    │
//! │   + ForkDb)    │     BlockItem      │  buffer, ≤10 par)│
//! └───────┬────────┘                    └────────┬─────────┘
//!         │ fire segment                         │ with_client
//!         ▼                                      ▼
//! ┌────────────────┐                    ┌──────────────────┐
//! │  BlockHandler  │                    │    ClientPool    │
//! └────────────────┘                    └──────────────────┘
//! ```
//!
//! Each delivered block either extends the current segment forward (advance to
//! `height + 1`) or, when its ancestry is incomplete, pivots the poller into
//! fetching the missing parent by hash. Once a segment reconnects to the LIB,
//! every not-yet-fired block is emitted ancestor-first, the LIB advances, old
//! links are purged, and the cursor is persisted.

pub mod prefetch;
pub mod state_file;

pub use prefetch::Prefetcher;
pub use state_file::{SavedBlockRef, SavedBlockRefWithPrev, StateFile};

use crate::{
    client::ClientPool,
    config::{self, PollerConfig},
    error::PollerError,
    fetch::{BlockFetcher, BlockHandler, Fetched},
    fork::{ForkDb, SegmentBlock, SegmentCursor},
    retry::retry,
    shutdown::Shutdown,
    types::{Block, BlockRef},
};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, warn};

enum FetchOutcome {
    Block(Block),
    StopReached,
    ChannelClosed,
}

/// Polls blocks from a pool of backend clients and emits a linear,
/// fork-resolved, irreversibility-aware stream to a [`BlockHandler`].
///
/// All state (fork db, cursor, prefetch buffer) is owned by the instance;
/// tests and embedders construct independent pollers. The fork db and cursor
/// are only ever touched by the task driving [`run`](BlockPoller::run).
pub struct BlockPoller<C, F, H>
where
    C: Clone + Send + Sync + 'static,
    F: BlockFetcher<C> + 'static,
    H: BlockHandler,
{
    start_block_num_gate: u64,
    fetch_block_retry_count: u64,
    state_store_path: Option<PathBuf>,
    ignore_cursor: bool,
    force_finality_after_blocks: Option<u64>,

    fetcher: Arc<F>,
    handler: H,
    pool: Arc<ClientPool<C>>,

    fork_db: ForkDb,
    shutdown: Shutdown,
}

impl<C, F, H> BlockPoller<C, F, H>
where
    C: Clone + Send + Sync + 'static,
    F: BlockFetcher<C> + 'static,
    H: BlockHandler,
{
    #[must_use]
    pub fn new(fetcher: F, handler: H, pool: Arc<ClientPool<C>>) -> Self {
        Self {
            start_block_num_gate: 0,
            fetch_block_retry_count: u64::MAX,
            state_store_path: None,
            ignore_cursor: false,
            force_finality_after_blocks: config::force_finality_after_blocks_from_env(),
            fetcher: Arc::new(fetcher),
            handler,
            pool,
            fork_db: ForkDb::new(),
            shutdown: Shutdown::new(),
        }
    }

    /// Caps the retry budget for every fetched height. Default is effectively
    /// unlimited.
    #[must_use]
    pub fn with_block_fetch_retry_count(mut self, count: u64) -> Self {
        self.fetch_block_retry_count = count;
        self
    }

    /// Enables cursor persistence under `state_store_path`.
    #[must_use]
    pub fn with_state_storage(mut self, state_store_path: impl Into<PathBuf>) -> Self {
        self.state_store_path = Some(state_store_path.into());
        self
    }

    /// Starts from `first_streamable_block` even when a cursor file exists.
    /// The cursor is still saved as the poller progresses.
    #[must_use]
    pub fn ignoring_cursor(mut self) -> Self {
        self.ignore_cursor = true;
        self
    }

    /// Applies the tunables of a [`PollerConfig`].
    ///
    /// The per-attempt timeout is not applied here: the client pool is built
    /// by the embedder, via
    /// [`ClientPool::from_config`](crate::client::ClientPool::from_config).
    #[must_use]
    pub fn with_config(mut self, config: &PollerConfig) -> Self {
        self.fetch_block_retry_count = config.fetch_block_retry_count;
        self.state_store_path.clone_from(&config.state_store_path);
        self.ignore_cursor = config.ignore_cursor;
        self
    }

    /// Handle for external shutdown coordination.
    #[must_use]
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Read access to the fork database (introspection and tests).
    #[must_use]
    pub fn fork_db(&self) -> &ForkDb {
        &self.fork_db
    }

    /// Runs the poller until `stop_block` is reached or shutdown is signalled.
    ///
    /// Blocks below `first_streamable_block` are never emitted. A `stop_block`
    /// of `None` runs forever; the block at `stop_block` itself is not
    /// emitted.
    pub async fn run(
        &mut self,
        first_streamable_block: u64,
        stop_block: Option<u64>,
        block_fetch_batch_size: usize,
    ) -> Result<(), PollerError> {
        self.start_block_num_gate = first_streamable_block;
        info!(first_streamable_block, block_fetch_batch_size, "starting poller");

        self.handler.init().await;

        let resolved_start = self.init_state(first_streamable_block).await?;
        let stop_block = stop_block.unwrap_or(u64::MAX);

        let prefetcher = Arc::new(Prefetcher::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.fetcher),
            self.fetch_block_retry_count,
            self.shutdown.clone(),
        ));

        let mut cursor = SegmentCursor::new();
        let mut block_to_fetch = resolved_start.num;
        let mut hash_to_fetch: Option<String> = None;

        loop {
            if block_to_fetch >= stop_block {
                info!(stop_block, "stop block reached");
                return Ok(());
            }
            if self.shutdown.is_terminating() {
                info!("block poller terminating");
                return self.shutdown_result();
            }

            debug!(block_to_fetch, "about to fetch block");
            let block = match hash_to_fetch.take() {
                Some(hash) => {
                    self.fetch_block_with_hash(&prefetcher, block_to_fetch, &hash)
                        .await?
                }
                None => {
                    match self
                        .next_from_prefetcher(
                            &prefetcher,
                            &mut block_to_fetch,
                            stop_block,
                            block_fetch_batch_size,
                        )
                        .await?
                    {
                        FetchOutcome::Block(block) => block,
                        FetchOutcome::StopReached => return Ok(()),
                        FetchOutcome::ChannelClosed => return self.shutdown_result(),
                    }
                }
            };

            let (next_block, next_hash) = self.process_block(&mut cursor, block).await?;
            block_to_fetch = next_block;
            hash_to_fetch = next_hash;
        }
    }

    fn shutdown_result(&self) -> Result<(), PollerError> {
        match self.shutdown.take_cause() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Reads the next non-skipped block out of the prefetch buffer, advancing
    /// past skipped heights.
    async fn next_from_prefetcher(
        &self,
        prefetcher: &Arc<Prefetcher<C, F>>,
        block_to_fetch: &mut u64,
        stop_block: u64,
        batch_size: usize,
    ) -> Result<FetchOutcome, PollerError> {
        loop {
            let request = prefetcher.request_block(*block_to_fetch, batch_size);
            let Ok(item) = request.await else {
                info!("requested block channel was closed, quitting");
                return Ok(FetchOutcome::ChannelClosed);
            };

            if item.skipped {
                info!(block_num = item.block_number, "block was skipped");
                *block_to_fetch += 1;
                if *block_to_fetch >= stop_block {
                    info!(stop_block, "stop block reached");
                    return Ok(FetchOutcome::StopReached);
                }
                continue;
            }

            let Some(block) = item.block else {
                return Err(PollerError::UnexpectedSkip { num: item.block_number });
            };
            return Ok(FetchOutcome::Block(block));
        }
    }

    /// Folds one block into the fork db and decides what to fetch next:
    /// `(height + 1, None)` when the segment fired, or the missing ancestor's
    /// `(number, Some(hash))` when pivoting.
    async fn process_block(
        &mut self,
        cursor: &mut SegmentCursor,
        block: Block,
    ) -> Result<(u64, Option<String>), PollerError> {
        info!(block = %block.to_ref(), lib_num = block.lib_num, "processing block");

        let lib_num = self.fork_db.lib_num();
        if block.number < lib_num {
            return Err(PollerError::BelowLib { num: block.number, lib_num });
        }

        let block_ref = block.to_ref();
        let (_seen_block, seen_parent) = self.fork_db.add_link(block.clone());
        let tip = cursor.add_block(&block, seen_parent);

        let (segment, reaches_lib) = self.fork_db.complete_segment(&tip);
        debug!(
            tip = %tip,
            segment_len = segment.len(),
            reaches_lib,
            "checked if block completes a segment"
        );

        if reaches_lib {
            cursor.connected_to_lib();
            self.fire_complete_segment(&segment).await?;

            // the block is linked down to the LIB, so the lib_num it reports
            // can be trusted to advance our own
            debug!(block = %block_ref, lib_num = block.lib_num, "setting lib");
            self.fork_db.set_lib(&block_ref, block.lib_num);
            self.fork_db.purge_before_lib(0);

            self.save_state(&segment).await?;

            let last = segment.last().expect("a block segment is never empty");
            return Ok((last.num + 1, None));
        }

        cursor.not_connected_to_lib();
        let first = segment.first().expect("a block segment is never empty");

        // A segment whose ancestry drops below the LIB without touching it can
        // never become canonical; pivoting would fetch across the LIB, which
        // is forbidden. Leave the branch unfired and resume forward.
        if first.parent_num < lib_num && first.parent_id != self.lib_id() {
            warn!(
                tip = %tip,
                parent_num = first.parent_num,
                lib_num,
                "abandoning dead fork branch below the LIB"
            );
            cursor.abandon_segment();
            return Ok((block.number + 1, None));
        }

        Ok((first.parent_num, Some(first.parent_id.clone())))
    }

    fn lib_id(&self) -> &str {
        self.fork_db.lib().map_or("", |lib| lib.id.as_str())
    }

    /// Emits every not-yet-fired block of `segment`, ancestor-first.
    async fn fire_complete_segment(&mut self, segment: &[SegmentBlock]) -> Result<(), PollerError> {
        for entry in segment {
            let Some(link) = self.fork_db.link_mut(&entry.id) else {
                continue;
            };
            if link.fired {
                continue;
            }
            if link.block.number < self.start_block_num_gate {
                debug!(
                    block = %link.block.to_ref(),
                    gate = self.start_block_num_gate,
                    "suppressing emission below start gate"
                );
                continue;
            }

            self.handler
                .handle(&link.block)
                .await
                .map_err(|source| PollerError::Handler {
                    num: entry.num,
                    id: entry.id.clone(),
                    source,
                })?;
            link.fired = true;
        }
        Ok(())
    }

    /// Fetches the missing ancestor of a disjoint segment, bypassing the
    /// prefetch buffer (the running campaign is stale and gets cleared).
    async fn fetch_block_with_hash(
        &self,
        prefetcher: &Arc<Prefetcher<C, F>>,
        block_num: u64,
        hash: &str,
    ) -> Result<Block, PollerError> {
        info!(block_num, hash, "fetching block with hash");
        // TODO: use the hash to serve the pivot from a local block cache
        prefetcher.clear();

        let fetched = retry(self.fetch_block_retry_count, &self.shutdown, || {
            let fetcher = Arc::clone(&self.fetcher);
            self.pool.with_client(move |client| {
                let fetcher = Arc::clone(&fetcher);
                async move { fetcher.fetch(client, block_num).await }
            })
        })
        .await
        .map_err(|source| PollerError::FetchBlock { num: block_num, source })?;

        match fetched {
            Fetched::Skipped => Err(PollerError::UnexpectedSkip { num: block_num }),
            Fetched::Block(mut block) => {
                if let Some(depth) = self.force_finality_after_blocks {
                    block.lib_num = block.number.saturating_sub(depth);
                }
                Ok(block)
            }
        }
    }

    /// Resolves the starting point: either the persisted cursor or a fresh
    /// fetch of the first streamable block.
    async fn init_state(&mut self, first_streamable_block: u64) -> Result<BlockRef, PollerError> {
        let usable_store = match &self.state_store_path {
            Some(dir) if !self.ignore_cursor && state_file::exists(dir).await => Some(dir.clone()),
            Some(_) => None,
            None => {
                info!("no state store path set, skipping cursor check");
                None
            }
        };

        let Some(dir) = usable_store else {
            return self.bootstrap_from_first_streamable(first_streamable_block).await;
        };

        let state = state_file::load(&dir).await?;

        self.fork_db
            .init_lib(BlockRef::new(state.lib.id.clone(), state.lib.num));

        // replayed blocks are marked fired so the next completed segment
        // never re-emits them
        for saved in &state.blocks {
            let replayed = Block {
                id: saved.id.clone(),
                number: saved.num,
                parent_id: saved.previous_ref_id.clone(),
                parent_num: 0,
                lib_num: 0,
                payload: None,
            };
            self.fork_db.add_link(replayed);
            if let Some(link) = self.fork_db.link_mut(&saved.id) {
                link.fired = true;
            }
        }

        info!(
            start_block = state.last_fired_block.num,
            lib_num = state.lib.num,
            block_count = state.blocks.len(),
            "loaded cursor"
        );

        Ok(BlockRef::new(
            state.last_fired_block.id.clone(),
            state.last_fired_block.num,
        ))
    }

    async fn bootstrap_from_first_streamable(
        &mut self,
        first_streamable_block: u64,
    ) -> Result<BlockRef, PollerError> {
        info!(first_streamable_block, "no cursor in use, fetching first streamable block");

        loop {
            if self.shutdown.is_terminating() {
                return Err(PollerError::Terminated);
            }

            let fetcher = Arc::clone(&self.fetcher);
            let result = self
                .pool
                .with_client(move |client| {
                    let fetcher = Arc::clone(&fetcher);
                    async move { fetcher.fetch(client, first_streamable_block).await }
                })
                .await;

            match result {
                Ok(Fetched::Block(block)) => {
                    let block_ref = block.to_ref();
                    info!(first_streamable_block = %block_ref, "starting without cursor");
                    self.fork_db.init_lib(block_ref.clone());
                    return Ok(block_ref);
                }
                Ok(Fetched::Skipped) => {
                    return Err(PollerError::UnexpectedSkip { num: first_streamable_block });
                }
                Err(err) => {
                    warn!(first_streamable_block, %err, "fetching first streamable block");
                }
            }
        }
    }

    /// Persists the cursor after a fired segment. A missing state store path
    /// disables persistence.
    async fn save_state(&self, segment: &[SegmentBlock]) -> Result<(), PollerError> {
        let Some(dir) = &self.state_store_path else {
            debug!("no state store path set, skipping cursor save");
            return Ok(());
        };

        let last = segment.last().expect("a fired segment is never empty");
        let lib = self.fork_db.lib().cloned().unwrap_or_default();

        let state = StateFile {
            lib: SavedBlockRef { id: lib.id, num: lib.num },
            last_fired_block: SavedBlockRefWithPrev {
                id: last.id.clone(),
                num: last.num,
                previous_ref_id: last.parent_id.clone(),
            },
            blocks: segment
                .iter()
                .map(|s| SavedBlockRefWithPrev {
                    id: s.id.clone(),
                    num: s.num,
                    previous_ref_id: s.parent_id.clone(),
                })
                .collect(),
        };

        state_file::save(dir, &state).await?;

        info!(
            last_fired_block = last.num,
            lib_num = state.lib.num,
            block_count = state.blocks.len(),
            "saved cursor"
        );
        Ok(())
    }
}
