//! CLI command implementations.
//!
//! Each command works against a [`LocalStore`] and writes its report to the
//! given output, so the binary and the tests share one code path.

pub mod discard;
pub mod list;
pub mod prune;
pub mod retry;
pub mod status;

use driftsync_engine::SyncError;
use driftsync_store::{FileStore, StoreError};
use std::path::Path;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the CLI.
#[derive(Error, Debug)]
pub enum CliError {
    /// No store snapshot at the given path.
    #[error("no driftsync store found at {0}")]
    NoStore(String),

    /// The command needs `--path`.
    #[error("store path required for {0}")]
    MissingPath(&'static str),

    /// No sync queue row with this id.
    #[error("sync item {0} not found")]
    NotFound(u64),

    /// A command-line value could not be used.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Engine error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Output could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output could not be produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opens an existing file store. Never creates one.
pub fn open_store(path: &Path) -> CliResult<FileStore> {
    if !FileStore::exists(path) {
        return Err(CliError::NoStore(path.display().to_string()));
    }
    tracing::debug!(path = %path.display(), "opening store");
    Ok(FileStore::open(path)?)
}

/// Output format of listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl std::str::FromStr for Format {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CliError::InvalidArgument(format!(
                "unknown format '{other}' (expected text or json)"
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use driftsync_store::{
        LocalStore, MemoryStore, SyncItemFilter, SyncOperation, SyncQueueItem, SyncStatus,
    };
    use serde_json::json;

    /// A store with one pending, one dead and one synced row.
    pub async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_sync_item(SyncQueueItem::new(
                "todo",
                "t-1",
                SyncOperation::Create,
                json!({"id": "t-1", "title": "pending"}),
            ))
            .await
            .unwrap();

        let mut dead = store
            .insert_sync_item(SyncQueueItem::new(
                "project",
                "tmp-1",
                SyncOperation::Create,
                json!({"id": "tmp-1"}),
            ))
            .await
            .unwrap();
        dead.status = SyncStatus::Dead;
        dead.attempt_count = 5;
        dead.last_error = Some("validation failed: name required".into());
        store.update_sync_item(&dead).await.unwrap();

        let mut synced = store
            .insert_sync_item(SyncQueueItem::new(
                "todo",
                "t-2",
                SyncOperation::Delete,
                json!("t-2"),
            ))
            .await
            .unwrap();
        synced.status = SyncStatus::Synced;
        store.update_sync_item(&synced).await.unwrap();
        store
    }

    pub async fn row(store: &MemoryStore, status: SyncStatus) -> SyncQueueItem {
        store
            .sync_items(&SyncItemFilter::all().with_status(status))
            .await
            .unwrap()
            .remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_store_refuses_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(open_store(dir.path()), Err(CliError::NoStore(_))));
        assert!(!dir.path().join("store.lock").exists());
    }

    #[test]
    fn format_parses() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert!("yaml".parse::<Format>().is_err());
    }
}
