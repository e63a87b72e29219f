//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Resolve the config file
//! - `resolve_range` - Turn optional --from/--to flags into a date range
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use wattwise_core::{db::Database, models::DateRange, Config};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load an explicit config file, or fall back to the default resolution
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Config::load().context("Failed to load config"),
    }
}

/// Build a range from optional bounds, filling the missing ones from `default`
///
/// Returns None when neither a flag nor a default is available.
pub fn resolve_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    default: Option<DateRange>,
) -> Result<Option<DateRange>> {
    let start = from.or(default.map(|r| r.start));
    let end = to.or(default.map(|r| r.end));
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(
            DateRange::new(start, end).context("Invalid date range")?,
        )),
        _ => Ok(None),
    }
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    db.check_integrity().context("Integrity check failed")?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Ingest bills: wattwise bills ingest ./bills");
    println!("  2. Fetch weather: wattwise weather ingest");
    println!("  3. Forecast: wattwise forecast");

    Ok(())
}
