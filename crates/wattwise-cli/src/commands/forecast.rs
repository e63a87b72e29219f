//! Forecast command implementation

use anyhow::{Context, Result};
use chrono::NaiveDate;
use wattwise_core::{
    db::Database,
    forecast::{default_period_from, next_period_after, ForecastEngine, ForecastResult, RateBasis},
    models::DateRange,
    Config, Error,
};

use super::resolve_range;

/// Period after the latest bill, or the next 30 days when there are no bills
pub fn upcoming_period(db: &Database, today: NaiveDate) -> Result<DateRange> {
    let bills = db.list_bills()?;
    Ok(next_period_after(&bills).unwrap_or_else(|| default_period_from(today)))
}

pub fn cmd_forecast(
    db: &Database,
    config: &Config,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    json: bool,
    today: NaiveDate,
) -> Result<Option<ForecastResult>> {
    let default = upcoming_period(db, today)?;
    let period = resolve_range(from, to, Some(default))?.unwrap_or(default);

    let engine = ForecastEngine::new(
        db,
        &config.location.name,
        config.forecast,
        config.join.degree_day_base_c,
    );

    let result = match engine.forecast_from_store(period) {
        Ok(result) => result,
        Err(Error::InsufficientHistory { usable, required }) => {
            println!(
                "❌ Not enough history to forecast: {} bill(s) with weather, {} needed.",
                usable, required
            );
            println!("   💡 Ingest more bills, then run 'wattwise weather ingest'");
            return Ok(None);
        }
        Err(e) => return Err(e).context("Forecast failed"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(Some(result));
    }

    print_forecast(&result);
    Ok(Some(result))
}

fn print_forecast(result: &ForecastResult) {
    let basis = &result.basis;
    let band = &result.confidence_band;

    println!();
    println!("🔮 Forecast for {}", result.next_period);
    println!("   ─────────────────────────────────────────────");
    println!(
        "   Consumption: {:.0} kWh  ({:.0} – {:.0})",
        result.predicted_consumption_kwh, band.kwh_low, band.kwh_high
    );
    match (result.predicted_cost, band.cost_low, band.cost_high) {
        (Some(cost), Some(low), Some(high)) => {
            println!("   Cost:        R$ {:.2}  ({:.2} – {:.2})", cost, low, high)
        }
        _ => println!("   Cost:        n/a"),
    }

    println!();
    println!(
        "   Period temperature: {:.1}°C ({} of {} days from the outlook)",
        basis.period_mean_temp,
        basis.outlook_days,
        result.next_period.days()
    );
    println!(
        "   History: {} bill(s), {:?} fit",
        basis.bill_identities.len(),
        basis.fit
    );
    if let (Some(slope), Some(intercept)) = (basis.slope, basis.intercept) {
        println!(
            "   Model: kWh = {:.1} × temp + {:.1}",
            slope, intercept
        );
    }
    match &basis.rate_basis {
        RateBasis::LatestBill { tariff_flag, .. } => {
            if let Some(rate) = basis.rate {
                println!("   Rate: R$ {:.4}/kWh (latest bill, {} flag)", rate, tariff_flag);
            }
        }
        RateBasis::HistoricalAverage { bills } => {
            if let Some(rate) = basis.rate {
                println!("   Rate: R$ {:.4}/kWh (average of {} bills)", rate, bills);
            }
        }
        RateBasis::Unavailable => {}
    }

    if !result.warnings.is_empty() {
        println!();
        for warning in &result.warnings {
            println!("   ⚠️  {}", warning);
        }
    }
    println!();
}
