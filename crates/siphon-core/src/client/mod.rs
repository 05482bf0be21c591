//! Backend client pool with failover rotation and optional background
//! sorting.
//!
//! The pool owns an ordered vector of interchangeable client handles `C` and a
//! [`RollingStrategy`] deciding the rotation order. Its single primitive,
//! [`ClientPool::with_client`], runs a caller operation against one client at
//! a time under a per-attempt timeout, rotating on failure until the strategy
//! is exhausted.

pub mod pool;
pub mod rolling;
pub mod sort;

pub use pool::ClientPool;
pub use rolling::{AlwaysFirstStrategy, RollingStrategy, StickyRollingStrategy};
pub use sort::{SortDirection, SortValueFetcher};
