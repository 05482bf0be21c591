//! # Siphon Core
//!
//! Core library for a fork-aware blockchain block poller: it continuously
//! fetches blocks from one or more remote chain nodes, resolves forks against
//! a local fork database, and emits a linear, fork-resolved,
//! irreversibility-aware block stream to a downstream handler, with durable
//! cursor state for crash-safe resumption.
//!
//! This crate provides the foundational components for:
//!
//! - **[`poller`]**: The `BlockPoller` state machine driving the main loop,
//!   the optimistic `Prefetcher`, and cursor persistence.
//!
//! - **[`client`]**: Failover `ClientPool` over interchangeable backend
//!   clients with pluggable rolling strategies, per-attempt timeouts, and an
//!   optional background sorter.
//!
//! - **[`fork`]**: The in-memory `ForkDb` block graph and the segment cursor
//!   automaton deciding when a chain segment has reconnected to the last
//!   irreversible block (LIB).
//!
//! - **[`fetch`]**: The `BlockFetcher` and `BlockHandler` capability traits
//!   supplied by the embedder.
//!
//! - **[`config`]**: Layered configuration (defaults, file, `SIPHON_*`
//!   environment overrides) and the `FORCE_FINALITY_AFTER_BLOCKS` escape
//!   hatch.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         BlockPoller                          │
//! │  ┌───────────────┐  ┌────────────────┐  ┌────────────────┐   │
//! │  │ SegmentCursor │  │     ForkDb     │  │  cursor file   │   │
//! │  └───────┬───────┘  └───────┬────────┘  └───────┬────────┘   │
//! │          └────────── process_block ─────────────┘            │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │ request_block                │ handle
//!                 ▼                              ▼
//!        ┌─────────────────┐            ┌─────────────────┐
//!        │   Prefetcher    │            │  BlockHandler   │
//!        │ (buffered, ≤10  │            │   (embedder)    │
//!        │  parallel)      │            └─────────────────┘
//!        └────────┬────────┘
//!                 │ with_client (rotate + timeout + retry)
//!                 ▼
//!        ┌─────────────────┐
//!        │   ClientPool    │──► C, C, C … (embedder clients)
//!        └─────────────────┘
//! ```
//!
//! The poller task is the single writer of the fork db and the cursor; the
//! only cross-task communication into it is the prefetch buffer channel and
//! the per-instance [`shutdown::Shutdown`] signal.

pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fork;
pub mod poller;
pub mod retry;
pub mod shutdown;
pub mod types;

pub use client::{
    AlwaysFirstStrategy, ClientPool, RollingStrategy, SortDirection, SortValueFetcher,
    StickyRollingStrategy,
};
pub use config::PollerConfig;
pub use error::{BoxedError, ClientPoolError, CursorError, PollerError};
pub use fetch::{BlockFetcher, BlockHandler, Fetched};
pub use fork::{ForkDb, SegmentCursor};
pub use poller::BlockPoller;
pub use shutdown::Shutdown;
pub use types::{Block, BlockItem, BlockRef};
