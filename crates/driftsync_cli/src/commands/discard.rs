//! Discard command implementation.

use super::{CliError, CliResult};
use driftsync_engine::discard_item;
use driftsync_store::LocalStore;
use std::io::Write;

/// Runs the discard command. The row's local record is left as is.
pub async fn run(store: &dyn LocalStore, id: u64, out: &mut dyn Write) -> CliResult<()> {
    if !discard_item(store, id).await? {
        return Err(CliError::NotFound(id));
    }
    writeln!(out, "Discarded sync item {id}")?;
    Ok(())
}
