//! Core type definitions shared by the fork database, the prefetcher, and the
//! poller main loop.
//!
//! # Type Categories
//!
//! - [`BlockRef`]: lightweight `(id, num)` handle used everywhere a block is
//!   referenced without its payload
//! - [`Block`]: the core's chain-agnostic view of a fetched block
//! - [`BlockItem`]: one entry of the optimistic prefetch buffer
//!
//! # Performance Notes
//!
//! `Block` carries its chain-specific payload behind an `Arc` so that cloning
//! a block (the fork database keeps one copy, segments another) never copies
//! payload bytes.

use serde_json::Value;
use std::{fmt, sync::Arc};

/// A `(id, num)` reference to a block.
///
/// Two refs are equal iff their ids match; the number is carried for display
/// and ordering but does not participate in identity, mirroring the fact that
/// two competing chains can both produce a block at the same height.
#[derive(Debug, Clone, Default)]
pub struct BlockRef {
    pub id: String,
    pub num: u64,
}

impl BlockRef {
    #[must_use]
    pub fn new(id: impl Into<String>, num: u64) -> Self {
        Self { id: id.into(), num }
    }
}

impl PartialEq for BlockRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BlockRef {}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.num, self.id)
    }
}

/// The core's view of a block; the chain-specific payload is opaque.
///
/// # Invariants
///
/// - `number >= 1`
/// - `lib_num <= number`
/// - non-genesis blocks have a non-empty `parent_id`
///
/// The `lib_num` reported on each block is authoritative: the poller trusts
/// whatever irreversibility the chain client reports and advances its own LIB
/// from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    pub number: u64,
    pub parent_id: String,
    pub parent_num: u64,
    pub lib_num: u64,
    /// Chain-specific payload, untouched by the core. `None` for synthetic
    /// links replayed from a persisted cursor.
    pub payload: Option<Arc<Value>>,
}

impl Block {
    /// Returns the `(id, num)` reference of this block.
    #[must_use]
    pub fn to_ref(&self) -> BlockRef {
        BlockRef { id: self.id.clone(), num: self.number }
    }

    /// Returns the `(parent_id, parent_num)` reference of this block.
    #[must_use]
    pub fn parent_ref(&self) -> BlockRef {
        BlockRef { id: self.parent_id.clone(), num: self.parent_num }
    }
}

/// One resolved entry of the prefetch buffer, keyed by height.
///
/// `block_number` is the height that was requested, which is also the buffer
/// key; the delivered block is trusted to match it only once the state
/// machine validates it. `block` is always present when `skipped` is false;
/// a skipped item records a height at which the chain intentionally produced
/// no block.
#[derive(Debug, Clone)]
pub struct BlockItem {
    pub block_number: u64,
    pub block: Option<Block>,
    pub skipped: bool,
}

impl BlockItem {
    #[must_use]
    pub fn resolved(block_number: u64, block: Block) -> Self {
        Self { block_number, block: Some(block), skipped: false }
    }

    #[must_use]
    pub fn skipped(block_number: u64) -> Self {
        Self { block_number, block: None, skipped: true }
    }
}
