//! Wattwise CLI - Electricity bill forecaster
//!
//! Usage:
//!   wattwise init                  Initialize database
//!   wattwise bills ingest DIR      Extract and store new bill documents
//!   wattwise weather ingest        Fill weather gaps for the bill history
//!   wattwise forecast              Forecast the next bill

mod cli;
mod commands;


use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wattwise_core::{ExtractorClient, WeatherClient};

use cli::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let today = Utc::now().date_naive();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Status => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_status(&cli.db, cli.no_encrypt, &config)
        }
        Commands::Bills { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let config = commands::load_config(cli.config.as_deref())?;
            match action {
                BillsAction::Ingest {
                    dir,
                    accept_low_confidence,
                } => {
                    let extractor = ExtractorClient::from_config(&config.extraction);
                    commands::cmd_bills_ingest(
                        &db,
                        &config,
                        &extractor,
                        &dir,
                        accept_low_confidence,
                    )
                    .await
                    .map(|_| ())
                }
                BillsAction::Reextract { files } => {
                    let extractor = ExtractorClient::from_config(&config.extraction);
                    commands::cmd_bills_reextract(&db, &config, &extractor, &files)
                        .await
                        .map(|_| ())
                }
                BillsAction::List { json } => commands::cmd_bills_list(&db, json),
            }
        }
        Commands::Weather { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let config = commands::load_config(cli.config.as_deref())?;
            let provider = WeatherClient::from_config(&config.weather);
            match action {
                WeatherAction::Ingest { from, to } => {
                    commands::cmd_weather_ingest(&db, &config, &provider, from, to, today)
                        .await
                        .map(|_| ())
                }
                WeatherAction::Outlook { from, to } => {
                    commands::cmd_weather_outlook(&db, &config, &provider, from, to, today)
                        .await
                        .map(|_| ())
                }
                WeatherAction::List { from, to } => {
                    commands::cmd_weather_list(&db, &config, from, to)
                }
            }
        }
        Commands::Join { csv, json } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_join(&db, &config, csv.as_deref(), json).map(|_| ())
        }
        Commands::Forecast { from, to, json } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_forecast(&db, &config, from, to, json, today).map(|_| ())
        }
        Commands::Runs { kind, limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_runs(&db, kind.as_deref(), limit)
        }
    }
}
