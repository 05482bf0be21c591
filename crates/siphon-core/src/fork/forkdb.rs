//! Directed graph of `(id, parent_id)` block links with an active LIB.

use crate::types::{Block, BlockRef};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One node of the fork graph.
#[derive(Debug)]
pub struct ForkLink {
    pub block: Block,
    /// Flipped to `true` exactly once, the first time the handler accepts this
    /// block. Monotonic; replayed cursor blocks start out `true`.
    pub fired: bool,
}

/// A segment entry returned by [`ForkDb::complete_segment`], ancestor-first.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentBlock {
    pub id: String,
    pub num: u64,
    pub parent_id: String,
    pub parent_num: u64,
}

impl From<&Block> for SegmentBlock {
    fn from(block: &Block) -> Self {
        Self {
            id: block.id.clone(),
            num: block.number,
            parent_id: block.parent_id.clone(),
            parent_num: block.parent_num,
        }
    }
}

/// In-memory fork database: a mapping `id -> ForkLink` plus the active LIB.
///
/// Single-writer by construction: only the poller's state-machine task touches
/// it, so it carries no lock.
#[derive(Debug, Default)]
pub struct ForkDb {
    links: HashMap<String, ForkLink>,
    lib: Option<BlockRef>,
}

impl ForkDb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the LIB. Idempotent for the same ref; a different ref once seeded
    /// is ignored with a warning.
    pub fn init_lib(&mut self, lib: BlockRef) {
        match &self.lib {
            None => {
                debug!(lib = %lib, "initializing fork db LIB");
                self.lib = Some(lib);
            }
            Some(existing) if *existing == lib => {}
            Some(existing) => {
                warn!(existing = %existing, requested = %lib, "LIB already initialized, keeping existing");
            }
        }
    }

    #[must_use]
    pub fn lib(&self) -> Option<&BlockRef> {
        self.lib.as_ref()
    }

    #[must_use]
    pub fn lib_num(&self) -> u64 {
        self.lib.as_ref().map_or(0, |l| l.num)
    }

    /// Inserts `block` into the graph if absent.
    ///
    /// Returns `(seen_block, seen_parent)`: `seen_block` is true when the id
    /// already existed; `seen_parent` is true when the parent id is empty,
    /// equals the LIB id, is already linked, or sits strictly below the LIB
    /// number (no reorg can cross the LIB, so such a parent counts as
    /// connected).
    pub fn add_link(&mut self, block: Block) -> (bool, bool) {
        let seen_parent = self.is_parent_seen(&block);
        let seen_block = self.links.contains_key(&block.id);

        if !seen_block {
            self.links
                .insert(block.id.clone(), ForkLink { block, fired: false });
        }

        (seen_block, seen_parent)
    }

    fn is_parent_seen(&self, block: &Block) -> bool {
        if block.parent_id.is_empty() {
            return true;
        }
        if self.links.contains_key(&block.parent_id) {
            return true;
        }
        match &self.lib {
            Some(lib) => block.parent_id == lib.id || block.parent_num < lib.num,
            None => false,
        }
    }

    #[must_use]
    pub fn link(&self, id: &str) -> Option<&ForkLink> {
        self.links.get(id)
    }

    pub fn link_mut(&mut self, id: &str) -> Option<&mut ForkLink> {
        self.links.get_mut(id)
    }

    /// Walks parent pointers backwards from `tip` and returns the contiguous
    /// chain found, ancestor-first.
    ///
    /// `reaches_lib` is true iff the walk terminated at the LIB block itself
    /// or at a link whose parent is the LIB. A branch whose ancestry passes
    /// below the LIB number without touching the LIB id does not reach: it is
    /// a dead fork that can never become canonical.
    #[must_use]
    pub fn complete_segment(&self, tip: &BlockRef) -> (Vec<SegmentBlock>, bool) {
        let mut segment = Vec::new();
        let mut reaches_lib = false;

        let mut current = tip.id.as_str();
        while let Some(link) = self.links.get(current) {
            segment.push(SegmentBlock::from(&link.block));

            let connected = match &self.lib {
                Some(lib) => link.block.id == lib.id || link.block.parent_id == lib.id,
                None => false,
            };
            if connected {
                reaches_lib = true;
                break;
            }
            current = link.block.parent_id.as_str();
        }

        segment.reverse();
        (segment, reaches_lib)
    }

    /// Advances the LIB to the block at height `lib_num` in the chain of
    /// `head`, if that block is known.
    ///
    /// The walk follows parent links from `head`; when no linked block sits at
    /// exactly `lib_num` the LIB is left unchanged (it will advance once the
    /// gap is filled). The LIB number never decreases.
    pub fn set_lib(&mut self, head: &BlockRef, lib_num: u64) {
        if lib_num <= self.lib_num() {
            return;
        }

        let mut current = head.id.as_str();
        let new_lib = loop {
            let Some(link) = self.links.get(current) else {
                break None;
            };
            if link.block.number == lib_num {
                break Some(link.block.to_ref());
            }
            if link.block.number < lib_num {
                break None;
            }
            current = link.block.parent_id.as_str();
        };

        match new_lib {
            Some(lib) => {
                debug!(lib = %lib, "moving LIB");
                self.lib = Some(lib);
            }
            None => {
                debug!(head = %head, lib_num, "LIB target not linked yet, keeping current LIB");
            }
        }
    }

    /// Drops links whose number is strictly below `LIB.num - keep_depth`.
    pub fn purge_before_lib(&mut self, keep_depth: u64) {
        let Some(lib) = &self.lib else { return };
        let cutoff = lib.num.saturating_sub(keep_depth);
        self.links.retain(|_, link| link.block.number >= cutoff);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
