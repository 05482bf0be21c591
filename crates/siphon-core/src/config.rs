//! Poller configuration with layered loading.
//!
//! Configuration is resolved in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: the `Default` implementation below
//! 2. **Config file**: optional TOML/JSON file passed to [`PollerConfig::load`]
//! 3. **Environment variables**: `SIPHON_*` overrides for individual fields
//!
//! The finality override (`FORCE_FINALITY_AFTER_BLOCKS`) is deliberately kept
//! out of this struct: it is an operational escape hatch for chains that do
//! not report a LIB, read straight from the environment.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;

/// Environment variable enabling the finality override.
pub const FORCE_FINALITY_ENV: &str = "FORCE_FINALITY_AFTER_BLOCKS";

/// Reads `FORCE_FINALITY_AFTER_BLOCKS`; an unparsable value is ignored with a
/// warning.
#[must_use]
pub fn force_finality_after_blocks_from_env() -> Option<u64> {
    let raw = std::env::var(FORCE_FINALITY_ENV).ok()?;
    match raw.parse::<u64>() {
        Ok(depth) => Some(depth),
        Err(err) => {
            warn!(value = %raw, %err, "ignoring unparsable FORCE_FINALITY_AFTER_BLOCKS");
            None
        }
    }
}

/// Tunables consumed by [`BlockPoller`](crate::poller::BlockPoller).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// First block the poller streams; emissions below it are suppressed.
    /// Defaults to `1`.
    #[serde(default = "default_first_streamable_block")]
    pub first_streamable_block: u64,

    /// Exclusive upper bound; the block at this height is not emitted.
    /// Defaults to `None` (run forever).
    #[serde(default)]
    pub stop_block: Option<u64>,

    /// Number of heights one optimistic prefetch campaign covers.
    /// Defaults to `10`.
    #[serde(default = "default_block_fetch_batch_size")]
    pub block_fetch_batch_size: usize,

    /// Per-height retry budget. Defaults to effectively unlimited.
    #[serde(default = "default_fetch_block_retry_count")]
    pub fetch_block_retry_count: u64,

    /// Directory for the persisted cursor. `None` disables persistence.
    #[serde(default)]
    pub state_store_path: Option<PathBuf>,

    /// When true, do not load an existing cursor; saving continues as the
    /// poller progresses. Defaults to `false`.
    #[serde(default)]
    pub ignore_cursor: bool,

    /// Per-attempt timeout, in seconds, for every call made through the
    /// client pool; consumed by
    /// [`ClientPool::from_config`](crate::client::ClientPool::from_config).
    /// Defaults to `3`.
    #[serde(default = "default_max_block_fetch_duration_secs")]
    pub max_block_fetch_duration_secs: u64,
}

fn default_first_streamable_block() -> u64 {
    1
}

fn default_block_fetch_batch_size() -> usize {
    10
}

fn default_fetch_block_retry_count() -> u64 {
    u64::MAX
}

fn default_max_block_fetch_duration_secs() -> u64 {
    3
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            first_streamable_block: default_first_streamable_block(),
            stop_block: None,
            block_fetch_batch_size: default_block_fetch_batch_size(),
            fetch_block_retry_count: default_fetch_block_retry_count(),
            state_store_path: None,
            ignore_cursor: false,
            max_block_fetch_duration_secs: default_max_block_fetch_duration_secs(),
        }
    }
}

impl PollerConfig {
    /// Loads configuration from an optional file plus `SIPHON_*` environment
    /// overrides, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config: Self = builder
            .add_source(Environment::with_prefix("SIPHON"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// The per-attempt timeout as a [`Duration`].
    #[must_use]
    pub fn max_block_fetch_duration(&self) -> Duration {
        Duration::from_secs(self.max_block_fetch_duration_secs)
    }

    /// Rejects configurations that cannot produce any block.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_fetch_batch_size == 0 {
            return Err(ConfigError::Message(
                "block_fetch_batch_size must be at least 1".to_string(),
            ));
        }
        if self.first_streamable_block == 0 {
            return Err(ConfigError::Message(
                "first_streamable_block must be at least 1".to_string(),
            ));
        }
        if let Some(stop_block) = self.stop_block {
            if stop_block <= self.first_streamable_block {
                return Err(ConfigError::Message(format!(
                    "stop_block {stop_block} must be above first_streamable_block {}",
                    self.first_streamable_block
                )));
            }
        }
        Ok(())
    }
}
