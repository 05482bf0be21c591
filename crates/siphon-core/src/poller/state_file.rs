//! Durable cursor persistence.
//!
//! The cursor is a small JSON document written after every fired segment,
//! holding the LIB, the last fired block, and the segment itself. Together
//! with the `fired` replay on load it is sufficient to resume after a restart
//! without gaps or replays.

use crate::error::CursorError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const CURSOR_FILE_NAME: &str = "cursor.json";

/// A persisted `(id, num)` block reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedBlockRef {
    pub id: String,
    pub num: u64,
}

/// A persisted block reference carrying its parent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedBlockRefWithPrev {
    pub id: String,
    pub num: u64,
    #[serde(rename = "previous_ref_id")]
    pub previous_ref_id: String,
}

/// The cursor document as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(rename = "Lib")]
    pub lib: SavedBlockRef,
    #[serde(rename = "LastFiredBlock")]
    pub last_fired_block: SavedBlockRefWithPrev,
    /// The complete segment that was just fired, ancestor-first.
    #[serde(rename = "Blocks")]
    pub blocks: Vec<SavedBlockRefWithPrev>,
}

/// Full path of the cursor file inside `state_store_path`.
#[must_use]
pub fn cursor_file_path(state_store_path: &Path) -> PathBuf {
    state_store_path.join(CURSOR_FILE_NAME)
}

/// Whether a cursor file is present.
pub async fn exists(state_store_path: &Path) -> bool {
    let path = cursor_file_path(state_store_path);
    let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
    info!(state_store_path = %state_store_path.display(), exists, "cursor file check");
    exists
}

/// Loads the cursor file. The file is expected to exist; a missing or
/// malformed file is an error at this point.
pub async fn load(state_store_path: &Path) -> Result<StateFile, CursorError> {
    let path = cursor_file_path(state_store_path);
    let display = path.display().to_string();

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| CursorError::Io { path: display.clone(), source })?;

    serde_json::from_slice(&bytes).map_err(|source| CursorError::Encoding { path: display, source })
}

/// Writes the cursor file, creating the directory if needed.
///
/// Writes to a temporary sibling and renames it into place so a crash
/// mid-write never leaves a truncated cursor behind.
pub async fn save(state_store_path: &Path, state: &StateFile) -> Result<(), CursorError> {
    let path = cursor_file_path(state_store_path);
    let display = path.display().to_string();

    let bytes = serde_json::to_vec(state)
        .map_err(|source| CursorError::Encoding { path: display.clone(), source })?;

    tokio::fs::create_dir_all(state_store_path)
        .await
        .map_err(|source| CursorError::Io { path: display.clone(), source })?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|source| CursorError::Io { path: display.clone(), source })?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|source| CursorError::Io { path: display, source })?;

    Ok(())
}
