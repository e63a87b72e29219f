//! Ingestion history command implementation

use anyhow::Result;
use wattwise_core::{db::Database, models::IngestKind};

pub fn cmd_runs(db: &Database, kind: Option<&str>, limit: i64) -> Result<()> {
    let kind: Option<IngestKind> = kind
        .map(|k| k.parse().map_err(|e: String| anyhow::anyhow!(e)))
        .transpose()?;
    let runs = db.list_ingest_runs(kind, limit)?;

    if runs.is_empty() {
        println!("No ingestion runs recorded yet.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<8}  {:<19}  {:>5}  {:>7}  {:>6}  {:<9}",
        "ID", "Kind", "Started", "New", "Skipped", "Failed", "Status"
    );
    println!("{}", "─".repeat(72));
    for run in &runs {
        println!(
            "{:>5}  {:<8}  {:<19}  {:>5}  {:>7}  {:>6}  {:<9}",
            run.id,
            run.kind.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            run.new_count,
            run.skipped_count,
            run.failed_count,
            if run.finished_at.is_some() {
                "finished"
            } else {
                "abandoned"
            },
        );
    }
    Ok(())
}
