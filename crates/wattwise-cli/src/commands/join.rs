//! Join command implementation

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use wattwise_core::{
    db::Database,
    join::{write_csv, JoinedBillView, TemporalJoin},
    Config,
};

use super::{fmt_temp, truncate};

pub fn cmd_join(
    db: &Database,
    config: &Config,
    csv: Option<&Path>,
    json: bool,
) -> Result<Vec<JoinedBillView>> {
    let views = TemporalJoin::new(db, &config.location.name, config.join.degree_day_base_c)
        .join_all()?;

    if let Some(path) = csv {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_csv(&views, file)?;
        println!("📄 Wrote {} row(s) to {}", views.len(), path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(views);
    }

    if views.is_empty() {
        println!("No bills stored. Run 'wattwise bills ingest <dir>' first.");
        return Ok(views);
    }

    println!(
        "{:<16}  {:<23}  {:>8}  {:>10}  {:>8}  {:>8}  {:>8}  {:>8}",
        "Month", "Period", "kWh", "Cost", "Mean", "Min", "Max", "Coverage"
    );
    println!("{}", "─".repeat(105));
    for view in &views {
        println!(
            "{:<16}  {:<23}  {:>8.1}  {:>10.2}  {:>8}  {:>8}  {:>8}  {:>7.0}%",
            truncate(&view.bill.month_label(), 16),
            view.bill.period().to_string(),
            view.bill.consumption_kwh,
            view.bill.total_cost,
            fmt_temp(view.mean_of_daily_means),
            fmt_temp(view.min_of_daily_mins),
            fmt_temp(view.max_of_daily_maxs),
            view.coverage_ratio * 100.0,
        );
    }

    let partial = views.iter().filter(|v| v.partial).count();
    if partial > 0 {
        println!();
        println!(
            "⚠️  {} bill(s) have incomplete weather; run 'wattwise weather ingest'",
            partial
        );
    }
    Ok(views)
}
