//! List command implementation.

use super::{CliResult, Format};
use driftsync_store::{LocalStore, SyncItemFilter, SyncQueueItem, SyncStatus};
use std::io::Write;

/// Returns rows matching the optional status and model type, oldest first.
pub async fn collect(
    store: &dyn LocalStore,
    status: Option<SyncStatus>,
    model: Option<&str>,
    limit: Option<usize>,
) -> CliResult<Vec<SyncQueueItem>> {
    let mut filter = SyncItemFilter::all();
    if let Some(status) = status {
        filter = filter.with_status(status);
    }
    if let Some(model) = model {
        filter = filter.with_model_type(model);
    }
    let mut rows = store.sync_items(&filter).await?;
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

/// Runs the list command.
pub async fn run(
    store: &dyn LocalStore,
    status: Option<SyncStatus>,
    model: Option<&str>,
    limit: Option<usize>,
    format: Format,
    out: &mut dyn Write,
) -> CliResult<()> {
    let rows = collect(store, status, model, limit).await?;
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?,
        Format::Text => print_text_output(&rows, out)?,
    }
    Ok(())
}

fn print_text_output(rows: &[SyncQueueItem], out: &mut dyn Write) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "No sync items.");
    }
    writeln!(
        out,
        "{:>6}  {:<8} {:<7} {:<16} {:<38} {:>8}",
        "ID", "STATUS", "OP", "MODEL", "RECORD", "ATTEMPTS"
    )?;
    for row in rows {
        writeln!(
            out,
            "{:>6}  {:<8} {:<7} {:<16} {:<38} {:>8}",
            row.id,
            row.status,
            row.operation,
            row.model_type,
            row.model_id,
            row.attempt_count
        )?;
        if let Some(at) = row.next_retry_at {
            writeln!(out, "        next retry: {}", at.to_rfc3339())?;
        }
        if let Some(error) = &row.last_error {
            writeln!(out, "        last error: {error}")?;
        }
    }
    writeln!(out)?;
    writeln!(out, "{} item(s)", rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seeded_store;

    #[tokio::test]
    async fn filters_by_status_and_model() {
        let store = seeded_store().await;
        assert_eq!(collect(&store, None, None, None).await.unwrap().len(), 3);

        let dead = collect(&store, Some(SyncStatus::Dead), None, None)
            .await
            .unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].model_type, "project");

        let todos = collect(&store, None, Some("todo"), None).await.unwrap();
        assert_eq!(todos.len(), 2);
        assert_eq!(collect(&store, None, None, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn text_output_shows_errors() {
        let store = seeded_store().await;
        let mut out = Vec::new();
        run(&store, Some(SyncStatus::Dead), None, None, Format::Text, &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("tmp-1"));
        assert!(text.contains("last error: validation failed"));
        assert!(text.contains("1 item(s)"));
    }

    #[tokio::test]
    async fn json_output_is_an_array_of_rows() {
        let store = seeded_store().await;
        let mut out = Vec::new();
        run(&store, None, Some("todo"), None, Format::Json, &mut out)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["model_id"], "t-1");
    }
}
