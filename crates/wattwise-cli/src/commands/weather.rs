//! Weather command implementations (ingest, outlook, list)

use anyhow::{Context, Result};
use chrono::NaiveDate;
use wattwise_core::{
    db::Database,
    ingest::{default_range, WeatherIngestor},
    models::WeatherIngestionReport,
    weather::WeatherProvider,
    Config,
};

use super::{fmt_temp, resolve_range, upcoming_period};

pub async fn cmd_weather_ingest<P: WeatherProvider>(
    db: &Database,
    config: &Config,
    provider: &P,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<Option<WeatherIngestionReport>> {
    let default = default_range(db, today, config.weather.archive_lag_days)?;
    let Some(range) = resolve_range(from, to, default)? else {
        println!("Nothing to fetch: the archive horizon is before the first bill.");
        return Ok(None);
    };

    println!(
        "🌤️  Fetching weather for {} ({}) via {}...",
        config.location.name,
        range,
        provider.name()
    );

    let report = WeatherIngestor::from_config(db, provider, &config.weather)
        .ingest(&config.location, range)
        .await
        .context("Weather ingestion aborted")?;

    print_report(&report);
    Ok(Some(report))
}

pub async fn cmd_weather_outlook<P: WeatherProvider>(
    db: &Database,
    config: &Config,
    provider: &P,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<Option<WeatherIngestionReport>> {
    let default = upcoming_period(db, today)?;
    let Some(period) = resolve_range(from, to, Some(default))? else {
        return Ok(None);
    };

    println!(
        "🔮 Fetching weather outlook for {} ({})...",
        config.location.name, period
    );

    let report = WeatherIngestor::from_config(db, provider, &config.weather)
        .ingest_outlook(&config.location, period)
        .await
        .context("Weather outlook aborted")?;

    print_report(&report);
    Ok(Some(report))
}

fn print_report(report: &WeatherIngestionReport) {
    println!("✅ Weather ingestion complete!");
    println!("   New days: {}", report.fetched);
    println!("   Promoted (forecast → observed): {}", report.promoted);
    if report.refreshed > 0 {
        println!("   Refreshed forecasts: {}", report.refreshed);
    }
    println!("   Unchanged: {}", report.skipped);
    if report.rejected > 0 {
        println!("   Rejected (already observed): {}", report.rejected);
    }
    if report.invalid > 0 {
        println!("   Invalid days skipped: {}", report.invalid);
    }
    if report.ignored > 0 {
        println!("   Days outside the request ignored: {}", report.ignored);
    }
    if report.unserved > 0 {
        println!(
            "   Days beyond the provider's reach: {} (seasonal averages apply)",
            report.unserved
        );
    }
    for failed in &report.failed_ranges {
        println!("   ⚠️  {} not fetched: {}", failed.range, failed.detail);
    }
    if report.soft_failure.is_some() {
        println!();
        println!("   💡 The weather provider was unreachable for some dates; re-run later to fill them");
    }
}

pub fn cmd_weather_list(
    db: &Database,
    config: &Config,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let location = &config.location.name;
    let Some(range) = resolve_range(from, to, db.weather_span(location)?)? else {
        println!("No weather stored. Run 'wattwise weather ingest' first.");
        return Ok(());
    };

    let days = db.list_weather(location, range)?;
    if days.is_empty() {
        println!("No weather stored for {} in {}.", location, range);
        return Ok(());
    }

    println!(
        "{:<10}  {:>8}  {:>8}  {:>8}  {:<8}",
        "Date", "Min", "Mean", "Max", "Source"
    );
    println!("{}", "─".repeat(50));
    for day in &days {
        println!(
            "{:<10}  {:>8}  {:>8}  {:>8}  {:<8}",
            day.date.to_string(),
            fmt_temp(Some(day.temp_min)),
            fmt_temp(Some(day.temp_mean)),
            fmt_temp(Some(day.temp_max)),
            day.source.as_str(),
        );
    }
    println!();
    println!("{} day(s)", days.len());
    Ok(())
}
