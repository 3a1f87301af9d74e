//! Status command implementation.

use super::{CliResult, Format};
use chrono::{DateTime, Utc};
use driftsync_store::{LocalStore, SyncItemFilter, SyncStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Sync queue summary.
#[derive(Debug, Default, Serialize)]
pub struct StatusReport {
    /// Rows waiting to be pushed.
    pub pending: usize,
    /// Pending rows whose backoff has elapsed.
    pub due: usize,
    /// Rows that gave up.
    pub dead: usize,
    /// Rows kept after a successful push.
    pub synced: usize,
    /// Pending rows per model type.
    pub pending_by_model: BTreeMap<String, usize>,
    /// Creation time of the oldest pending row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Earliest scheduled retry among pending rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry: Option<DateTime<Utc>>,
}

/// Builds the summary of `store`'s sync queue.
pub async fn collect(store: &dyn LocalStore, now: DateTime<Utc>) -> CliResult<StatusReport> {
    let mut report = StatusReport::default();
    for row in store.sync_items(&SyncItemFilter::all()).await? {
        match row.status {
            SyncStatus::Pending => {
                report.pending += 1;
                if row.is_due(now) {
                    report.due += 1;
                }
                *report.pending_by_model.entry(row.model_type.clone()).or_default() += 1;
                report.oldest_pending = Some(match report.oldest_pending {
                    Some(oldest) => oldest.min(row.created_at),
                    None => row.created_at,
                });
                if let Some(at) = row.next_retry_at.filter(|at| *at > now) {
                    report.next_retry = Some(report.next_retry.map_or(at, |next| next.min(at)));
                }
            }
            SyncStatus::Dead => report.dead += 1,
            SyncStatus::Synced => report.synced += 1,
        }
    }
    Ok(report)
}

/// Runs the status command.
pub async fn run(store: &dyn LocalStore, format: Format, out: &mut dyn Write) -> CliResult<()> {
    let report = collect(store, Utc::now()).await?;
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        Format::Text => print_text_output(&report, out)?,
    }
    Ok(())
}

fn print_text_output(report: &StatusReport, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "Sync Queue Status")?;
    writeln!(out, "=================")?;
    writeln!(out)?;
    writeln!(out, "  Pending: {} ({} due now)", report.pending, report.due)?;
    writeln!(out, "  Dead:    {}", report.dead)?;
    writeln!(out, "  Synced:  {}", report.synced)?;

    if !report.pending_by_model.is_empty() {
        writeln!(out)?;
        writeln!(out, "Pending by model:")?;
        for (model, count) in &report.pending_by_model {
            writeln!(out, "  {model:<20} {count}")?;
        }
    }
    if let Some(oldest) = report.oldest_pending {
        writeln!(out)?;
        writeln!(out, "Oldest pending: {}", oldest.to_rfc3339())?;
    }
    if let Some(next) = report.next_retry {
        writeln!(out, "Next retry:     {}", next.to_rfc3339())?;
    }
    if report.dead > 0 {
        writeln!(out)?;
        writeln!(out, "Use 'driftsync list --status dead' to inspect dead rows.")?;
    }
    Ok(())
}
