//! Status command implementation

use std::path::Path;

use anyhow::Result;
use wattwise_core::{
    db::{Database, DB_KEY_ENV},
    join::{JoinSummary, TemporalJoin},
    Config,
};

use super::{fmt_temp, open_db};

pub fn cmd_status(db_path: &Path, no_encrypt: bool, config: &Config) -> Result<()> {
    use std::fs;

    println!();
    println!("📊 Wattwise Status");
    println!("   ─────────────────────────────────────────────────────────────");

    // Database path
    println!("   Database: {}", db_path.display());

    // Check if database file exists and get size
    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    // Check encryption status
    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    println!(
        "   Location: {} ({:.4}, {:.4}, {})",
        config.location.name,
        config.location.latitude,
        config.location.longitude,
        config.location.timezone
    );
    println!(
        "   Extraction: {} @ {}",
        config.extraction.model, config.extraction.host
    );

    // Try to open the database and show stats
    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => {
                print_summary(&db, config)?;
            }
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {:#}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}

/// Store counts and headline figures
pub fn print_summary(db: &Database, config: &Config) -> Result<JoinSummary> {
    let location = &config.location.name;
    let views = TemporalJoin::new(db, location, config.join.degree_day_base_c).join_all()?;
    let summary = JoinSummary::from_views(&views);

    println!();
    println!("   Bills: {}", summary.bills);
    println!(
        "   Weather days: {} ({} observed)",
        db.weather_count(location)?,
        db.observed_weather_count(location)?
    );
    if let Some(span) = db.weather_span(location)? {
        println!("   Weather span: {}", span);
    }

    if summary.bills > 0 {
        println!();
        println!("   Total spend: R$ {:.2}", summary.total_cost);
        println!(
            "   Total consumption: {:.0} kWh",
            summary.total_consumption_kwh
        );
        if let Some(mean) = summary.mean_monthly_cost {
            println!("   Mean monthly cost: R$ {:.2}", mean);
        }
        println!(
            "   Mean temperature: {} ({} of {} bills with weather)",
            fmt_temp(summary.mean_temperature),
            summary.bills_with_weather,
            summary.bills
        );
    }
    Ok(summary)
}
