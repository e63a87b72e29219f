//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Wattwise - Forecast your next electricity bill from past bills and weather
#[derive(Parser)]
#[command(name = "wattwise")]
#[command(about = "Electricity bill ingestion and next-bill forecasting", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "wattwise.db", global = true)]
    pub db: PathBuf,

    /// Config file (defaults to $WATTWISE_CONFIG, then the data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set WATTWISE_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Ingest and list utility bills
    Bills {
        #[command(subcommand)]
        action: BillsAction,
    },

    /// Fetch and list daily weather
    Weather {
        #[command(subcommand)]
        action: WeatherAction,
    },

    /// Show bills joined with the weather of their billing period
    Join {
        /// Also write the joined views to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Forecast the next bill
    Forecast {
        /// First day of the period (defaults to the day after the latest bill)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day of the period (defaults to the latest bill's length)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show recent ingestion runs
    Runs {
        /// Only show runs of this kind: bills, weather
        #[arg(short, long)]
        kind: Option<String>,

        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Show database status and headline figures
    Status,
}

#[derive(Subcommand)]
pub enum BillsAction {
    /// Extract and store every new bill document in a directory
    Ingest {
        /// Directory with bill PDFs (text layer) or images (png/jpg)
        dir: PathBuf,

        /// Store low-confidence extractions without asking
        #[arg(long)]
        accept_low_confidence: bool,
    },

    /// Extract documents again and overwrite their stored bills
    Reextract {
        /// Bill documents to extract again
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List stored bills
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum WeatherAction {
    /// Fill missing or forecast-only days
    ///
    /// Defaults to the earliest bill start through the archive horizon.
    Ingest {
        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Fetch forecast days for the upcoming bill period
    Outlook {
        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// List stored weather days
    List {
        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,
    },
}
