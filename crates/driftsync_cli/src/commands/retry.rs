//! Retry command implementation.

use super::{CliError, CliResult};
use driftsync_engine::{retry_item, SyncError};
use driftsync_store::{LocalStore, StoreError};
use std::io::Write;

/// Runs the retry command: the row becomes pending and due immediately.
pub async fn run(store: &dyn LocalStore, id: u64, out: &mut dyn Write) -> CliResult<()> {
    let item = retry_item(store, id).await.map_err(|e| match e {
        SyncError::Store(StoreError::SyncItemNotFound { id }) => CliError::NotFound(id),
        other => CliError::Sync(other),
    })?;
    writeln!(
        out,
        "Requeued sync item {} ({} {} {})",
        item.id, item.operation, item.model_type, item.model_id
    )?;
    Ok(())
}
