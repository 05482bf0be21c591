//! Error types for the polling core.
//!
//! Transient fetch failures are absorbed locally by client rotation and retry;
//! everything surfaced through these enums is either fatal to the poller or a
//! terminal shutdown condition. Capability implementations (fetcher, handler,
//! sort value fetcher) report their own failures as boxed errors which the
//! core wraps with context.

use std::fmt;
use thiserror::Error;

/// Boxed error type used at the capability boundary.
///
/// Embedder-supplied fetchers and handlers are free to use any error type;
/// the core only needs `Display` and source chaining.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by [`ClientPool::with_client`](crate::client::ClientPool::with_client).
#[derive(Debug, Error)]
pub enum ClientPoolError {
    /// The rolling strategy ran out of clients before any attempt succeeded.
    ///
    /// Carries every per-attempt error accumulated during the session, in
    /// attempt order. An empty list means the pool had no clients at all.
    #[error("no more clients to try: {}", AttemptErrors(attempts))]
    NoMoreClients { attempts: Vec<BoxedError> },

    /// A single attempt exceeded the configured per-attempt timeout.
    ///
    /// Only ever observed inside the attempt list of `NoMoreClients`;
    /// a timeout on its own triggers rotation, not failure.
    #[error("operation timed out after {0:?}")]
    AttemptTimeout(std::time::Duration),
}

struct AttemptErrors<'a>(&'a [BoxedError]);

impl fmt::Display for AttemptErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no clients in pool");
        }
        write!(f, "{} attempt(s) failed: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Errors reading or writing the persisted cursor file.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor file i/o at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cursor file encoding at {path}: {source}")]
    Encoding {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fatal poller errors; any of these terminates the main loop.
#[derive(Debug, Error)]
pub enum PollerError {
    /// Fetching a block exhausted the retry budget.
    #[error("fetching block {num}: {source}")]
    FetchBlock {
        num: u64,
        #[source]
        source: ClientPoolError,
    },

    /// The fetcher reported `skipped` for a block that was requested by hash
    /// or as the first streamable block, where a skip is a contract violation.
    #[error("block {num} was skipped and should not have been requested")]
    UnexpectedSkip { num: u64 },

    /// A block below the current LIB was received. No reorganization is ever
    /// permitted to cross the LIB, so this indicates a buggy chain client or
    /// a corrupted cursor.
    #[error("block {num} is below the current LIB {lib_num}; no reorg may cross the LIB")]
    BelowLib { num: u64, lib_num: u64 },

    /// The downstream handler rejected a block.
    #[error("handling block #{num} ({id}): {source}")]
    Handler {
        num: u64,
        id: String,
        #[source]
        source: BoxedError,
    },

    #[error("cursor state: {0}")]
    Cursor(#[from] CursorError),

    /// The poller was asked to shut down before completing.
    #[error("poller terminated by shutdown signal")]
    Terminated,
}
