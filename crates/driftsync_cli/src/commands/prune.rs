//! Prune command implementation.

use super::CliResult;
use driftsync_engine::prune_synced_items;
use driftsync_store::{LocalStore, SyncItemFilter, SyncStatus};
use std::io::Write;
use std::time::Duration;

/// Runs the prune command, deleting synced rows older than `older_than_hours`.
pub async fn run(
    store: &dyn LocalStore,
    older_than_hours: u64,
    dry_run: bool,
    out: &mut dyn Write,
) -> CliResult<()> {
    let older_than = Duration::from_secs(older_than_hours.saturating_mul(3600));
    if dry_run {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let candidates = store
            .sync_items(&SyncItemFilter::all().with_status(SyncStatus::Synced))
            .await?
            .into_iter()
            .filter(|row| row.updated_at < cutoff)
            .count();
        writeln!(out, "(dry run) {candidates} synced item(s) would be pruned")?;
        return Ok(());
    }

    let pruned = prune_synced_items(store, older_than).await?;
    writeln!(out, "Pruned {pruned} synced item(s)")?;
    Ok(())
}
