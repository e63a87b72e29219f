//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, load_config, date ranges)
//! - `bills` - Bill ingestion, re-extraction and listing
//! - `weather` - Weather ingestion, outlook and listing
//! - `join` - Joined bill/weather views and CSV export
//! - `forecast` - Next-bill forecast
//! - `runs` - Ingestion run history
//! - `status` - Database status and headline figures

pub mod bills;
pub mod core;
pub mod forecast;
pub mod join;
pub mod runs;
pub mod status;
pub mod weather;

// Re-export command functions for main.rs
pub use bills::*;
pub use core::*;
pub use forecast::*;
pub use join::*;
pub use runs::*;
pub use status::*;
pub use weather::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Format an optional temperature for tables
pub fn fmt_temp(t: Option<f64>) -> String {
    t.map(|t| format!("{:.1}°C", t))
        .unwrap_or_else(|| "n/a".to_string())
}
