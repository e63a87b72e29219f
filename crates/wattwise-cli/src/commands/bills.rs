//! Bill command implementations (ingest, reextract, list)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use wattwise_core::{
    db::Database,
    extract::{BillExtractor, DocumentRef},
    ingest::{discover_documents, BillIngestOptions, BillIngestor},
    models::{BillIngestionReport, FailureReason},
    Config,
};

use super::truncate;

pub async fn cmd_bills_ingest<E: BillExtractor>(
    db: &Database,
    config: &Config,
    extractor: &E,
    dir: &Path,
    accept_low_confidence: bool,
) -> Result<BillIngestionReport> {
    let (documents, read_failures) = discover_documents(dir)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;

    println!(
        "📥 Ingesting {} document(s) from {}...",
        documents.len(),
        dir.display()
    );
    if !extractor.health_check().await {
        println!(
            "   ⚠️  Extraction backend ({}) is not responding; new documents will fail",
            extractor.model()
        );
    }

    let options = BillIngestOptions::from_config(&config.extraction)
        .accept_low_confidence(accept_low_confidence);
    let mut report = BillIngestor::new(db, extractor, options)
        .ingest(&documents)
        .await
        .context("Bill ingestion aborted")?;
    report.failed.extend(read_failures);

    print_report(&report);
    Ok(report)
}

pub async fn cmd_bills_reextract<E: BillExtractor>(
    db: &Database,
    config: &Config,
    extractor: &E,
    files: &[PathBuf],
) -> Result<BillIngestionReport> {
    let documents = files
        .iter()
        .map(|path| {
            DocumentRef::from_path(path)
                .with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    println!("🔁 Re-extracting {} document(s)...", documents.len());

    let options = BillIngestOptions::from_config(&config.extraction).accept_low_confidence(true);
    let report = BillIngestor::new(db, extractor, options)
        .reextract(&documents)
        .await
        .context("Re-extraction aborted")?;

    print_report(&report);
    Ok(report)
}

fn print_report(report: &BillIngestionReport) {
    println!("✅ Bill ingestion complete!");
    println!("   New: {}", report.new);
    if report.replaced > 0 {
        println!("   Replaced: {}", report.replaced);
    }
    println!("   Skipped (already stored): {}", report.skipped);

    if report.failed.is_empty() {
        return;
    }
    println!("   Failed: {}", report.failed.len());
    for failure in &report.failed {
        println!(
            "     ❌ {} [{}] {}",
            failure.source,
            failure.reason,
            truncate(&failure.detail, 80)
        );
    }
    if report
        .failed
        .iter()
        .any(|f| f.reason == FailureReason::NeedsConfirmation)
    {
        println!();
        println!("   💡 Review low-confidence bills, then re-run with --accept-low-confidence");
    }
}

pub fn cmd_bills_list(db: &Database, json: bool) -> Result<()> {
    let bills = db.list_bills()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&bills)?);
        return Ok(());
    }

    if bills.is_empty() {
        println!("No bills stored. Run 'wattwise bills ingest <dir>' first.");
        return Ok(());
    }

    println!(
        "{:<16}  {:<23}  {:>8}  {:>10}  {:<8}  {:<20}",
        "Month", "Period", "kWh", "Cost", "Flag", "Source"
    );
    println!("{}", "─".repeat(94));
    for bill in &bills {
        println!(
            "{:<16}  {:<23}  {:>8.1}  {:>10.2}  {:<8}  {:<20}",
            truncate(&bill.month_label(), 16),
            bill.period().to_string(),
            bill.consumption_kwh,
            bill.total_cost,
            bill.tariff_flag.as_str(),
            truncate(
                bill.source_name.as_deref().unwrap_or(bill.short_identity()),
                20
            ),
        );
    }
    println!();
    println!("{} bill(s)", bills.len());
    Ok(())
}
