//! Pool ordering by a caller-supplied scalar.

use crate::error::BoxedError;
use async_trait::async_trait;

/// Direction of a pool sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Produces the scalar a client is sorted by (head block number, latency,
/// whatever the embedder prefers).
#[async_trait]
pub trait SortValueFetcher<C>: Send + Sync {
    async fn fetch_sort_value(&self, client: &C) -> Result<u64, BoxedError>;
}
