//! Forecast Engine
//!
//! Predicts the next bill from the joined history:
//! 1. Fit consumption on period mean temperature (bills with weather only)
//! 2. Estimate the next period's mean temperature from the outlook, filling
//!    uncovered days with the observed average for the same calendar month
//! 3. Predict, clamp at zero, and hold the extreme historical point when
//!    extrapolating in the direction of the fit
//! 4. Price the prediction with the latest bill's rate (or the average rate)
//! 5. Widen the band when the outlook covers less of the period

mod regression;
mod types;

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Duration, NaiveDate};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::join::{JoinedBillView, TemporalJoin};
use crate::models::{Bill, DateRange, TariffFlag, WeatherDay};

pub use regression::{fit, Fit, FitKind};
pub use types::{
    ConfidenceBand, ForecastBasis, ForecastPolicy, ForecastResult, ForecastWarning, RateBasis,
};

/// Default period length when there is no bill to copy one from
const DEFAULT_PERIOD_DAYS: i64 = 30;

/// Band spread floor in kWh, for histories with nothing to scale against
const MIN_SPREAD_KWH: f64 = 1.0;

/// Forecast engine reading history from the store
pub struct ForecastEngine<'a> {
    db: &'a Database,
    location: String,
    policy: ForecastPolicy,
    degree_day_base_c: f64,
}

impl<'a> ForecastEngine<'a> {
    pub fn new(
        db: &'a Database,
        location: &str,
        policy: ForecastPolicy,
        degree_day_base_c: f64,
    ) -> Self {
        Self {
            db,
            location: location.to_string(),
            policy,
            degree_day_base_c,
        }
    }

    /// Forecast `next_period` using an explicit outlook
    ///
    /// Read-only: the store is never written, including on failure.
    pub fn forecast(
        &self,
        next_period: DateRange,
        outlook: &[WeatherDay],
    ) -> Result<ForecastResult> {
        let views = TemporalJoin::new(self.db, &self.location, self.degree_day_base_c).join_all()?;
        let seasonal = self.db.observed_monthly_means(&self.location)?;

        let result = forecast_from_views(&views, next_period, outlook, &seasonal, &self.policy)?;
        info!(
            period = %next_period,
            kwh = result.predicted_consumption_kwh,
            cost = ?result.predicted_cost,
            warnings = result.warnings.len(),
            "Forecast computed"
        );
        Ok(result)
    }

    /// Forecast `next_period` using whatever weather the store holds for it
    ///
    /// Stored forecast samples (see `ingest_outlook`) and any observed days
    /// already inside the period both count as outlook.
    pub fn forecast_from_store(&self, next_period: DateRange) -> Result<ForecastResult> {
        let outlook = self.db.list_weather(&self.location, next_period)?;
        self.forecast(next_period, &outlook)
    }

    /// The period following the latest bill (see `next_period_after`)
    pub fn next_period(&self) -> Result<Option<DateRange>> {
        let bills = self.db.list_bills()?;
        Ok(next_period_after(&bills))
    }
}

/// Period after the bill with the latest end date
///
/// Ends on the utility's scheduled next reading when the bill printed one,
/// otherwise lasts as long as that bill's period.
pub fn next_period_after(bills: &[Bill]) -> Option<DateRange> {
    let latest = bills.iter().max_by_key(|b| (b.period_end, b.period_start))?;
    let start = latest.period_end + Duration::days(1);
    let end = match latest.next_reading {
        Some(next) if next >= start => next,
        _ => start + Duration::days(latest.period().days().max(1) - 1),
    };
    Some(DateRange { start, end })
}

/// Default period when no bill exists: the next `DEFAULT_PERIOD_DAYS` days from `today`
pub fn default_period_from(today: NaiveDate) -> DateRange {
    DateRange {
        start: today,
        end: today + Duration::days(DEFAULT_PERIOD_DAYS - 1),
    }
}

/// Forecast from already-joined views (pure)
///
/// `seasonal` maps calendar month (1-12) to the mean observed temperature.
pub fn forecast_from_views(
    views: &[JoinedBillView],
    next_period: DateRange,
    outlook: &[WeatherDay],
    seasonal: &HashMap<u32, f64>,
    policy: &ForecastPolicy,
) -> Result<ForecastResult> {
    // 1. History series
    let usable: Vec<&JoinedBillView> = views
        .iter()
        .filter(|v| v.coverage_ratio > 0.0)
        .collect();
    let points: Vec<(f64, f64)> = usable
        .iter()
        .filter_map(|v| {
            v.mean_of_daily_means
                .map(|t| (t, v.bill.consumption_kwh))
        })
        .collect();

    if points.len() < policy.min_history {
        return Err(Error::InsufficientHistory {
            usable: points.len(),
            required: policy.min_history,
        });
    }

    // 2. Fit
    let model = fit(&points).ok_or(Error::InsufficientHistory {
        usable: 0,
        required: policy.min_history,
    })?;

    // 3. Period temperature
    let history_mean_temp = points.iter().map(|(t, _)| t).sum::<f64>() / points.len() as f64;
    let period_temp = period_temperature(next_period, outlook, seasonal, history_mean_temp);

    // 4. Predict, clamp, guard
    let mut warnings = Vec::new();
    let raw = model.predict(period_temp.mean);
    let mut predicted = raw;
    if predicted < 0.0 {
        predicted = 0.0;
        warnings.push(ForecastWarning::ClampedToZero);
    }
    if let Some(floor) = extrapolation_floor(&model, &points, period_temp.mean) {
        if predicted < floor {
            debug!(raw, floor, "Extrapolation guard applied");
            predicted = floor;
            warnings.retain(|w| *w != ForecastWarning::ClampedToZero);
            warnings.push(ForecastWarning::ExtrapolationGuard { floor_kwh: floor });
        }
    }

    // 5. Rate
    let (rate, rate_basis) = choose_rate(views);
    if rate.is_none() {
        warnings.push(ForecastWarning::NoRateInformation);
    }

    // 6. Band
    let period_days = next_period.days();
    let outlook_coverage = period_temp.outlook_days as f64 / period_days as f64;
    if period_temp.outlook_days < period_days as usize {
        warnings.push(ForecastWarning::PartialOutlook {
            outlook_days: period_temp.outlook_days,
            period_days,
        });
    }

    let mean_consumption = points.iter().map(|(_, y)| y).sum::<f64>() / points.len() as f64;
    let scale = if predicted > 0.0 {
        predicted
    } else {
        mean_consumption
    };
    let spread = model
        .residual_sd
        .unwrap_or(0.0)
        .max(policy.min_relative_sd * scale)
        .max(MIN_SPREAD_KWH);
    let half = policy.z_score * spread * (1.0 + policy.deficit_weight * (1.0 - outlook_coverage));

    let kwh_low = (predicted - half).max(0.0);
    let kwh_high = predicted + half;

    let confidence_band = ConfidenceBand {
        kwh_low,
        kwh_high,
        cost_low: rate.map(|r| kwh_low * r),
        cost_high: rate.map(|r| kwh_high * r),
    };

    let (slope, intercept) = match model.kind {
        FitKind::Linear => (Some(model.slope), Some(model.intercept)),
        FitKind::SinglePoint | FitKind::Flat => (None, None),
    };

    Ok(ForecastResult {
        next_period,
        predicted_consumption_kwh: predicted,
        predicted_cost: rate.map(|r| predicted * r),
        confidence_band,
        basis: ForecastBasis {
            bill_identities: usable.iter().map(|v| v.bill.identity.clone()).collect(),
            fit: model.kind,
            slope,
            intercept,
            residual_sd: model.residual_sd,
            period_mean_temp: period_temp.mean,
            outlook_days: period_temp.outlook_days,
            fallback_days: period_temp.fallback_days,
            outlook_coverage,
            rate,
            rate_basis,
        },
        warnings,
    })
}

struct PeriodTemperature {
    mean: f64,
    outlook_days: usize,
    fallback_days: Vec<NaiveDate>,
}

/// Mean temperature over every day of `period`
///
/// Outlook days inside the period are used as-is; the rest take the seasonal
/// mean for their month, or `history_mean` when that month has no observations.
fn period_temperature(
    period: DateRange,
    outlook: &[WeatherDay],
    seasonal: &HashMap<u32, f64>,
    history_mean: f64,
) -> PeriodTemperature {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for day in outlook.iter().filter(|d| period.contains(d.date)) {
        by_date.entry(day.date).or_insert(day.temp_mean);
    }

    let mut total = 0.0;
    let mut fallback_days = Vec::new();
    for date in period.iter_days() {
        match by_date.get(&date) {
            Some(t) => total += t,
            None => {
                total += seasonal.get(&date.month()).copied().unwrap_or(history_mean);
                fallback_days.push(date);
            }
        }
    }

    PeriodTemperature {
        mean: total / period.days() as f64,
        outlook_days: by_date.len(),
        fallback_days,
    }
}

/// Minimum prediction when extrapolating along the fit's direction
///
/// Warmer than all history with an increasing fit holds at the warmest
/// point's consumption; colder than all history with a decreasing fit holds
/// at the coldest point's.
fn extrapolation_floor(model: &Fit, points: &[(f64, f64)], temperature: f64) -> Option<f64> {
    if model.kind != FitKind::Linear {
        return None;
    }

    let max_t = points.iter().map(|(t, _)| *t).fold(f64::NEG_INFINITY, f64::max);
    let min_t = points.iter().map(|(t, _)| *t).fold(f64::INFINITY, f64::min);

    let extreme_t = if model.slope > 0.0 && temperature > max_t {
        max_t
    } else if model.slope < 0.0 && temperature < min_t {
        min_t
    } else {
        return None;
    };

    points
        .iter()
        .filter(|(t, _)| *t == extreme_t)
        .map(|(_, kwh)| *kwh)
        .reduce(f64::max)
}

/// Pick the energy rate for pricing
fn choose_rate(views: &[JoinedBillView]) -> (Option<f64>, RateBasis) {
    let latest = views
        .iter()
        .map(|v| &v.bill)
        .max_by_key(|b| (b.period_end, b.period_start));

    if let Some(bill) = latest {
        if bill.tariff_flag != TariffFlag::Unknown && bill.consumption_kwh > 0.0 {
            let surcharge = bill.surcharge.unwrap_or(0.0);
            let energy_rate = (bill.total_cost - surcharge) / bill.consumption_kwh;
            let surcharge_per_kwh = if bill.tariff_flag == TariffFlag::Green {
                0.0
            } else {
                surcharge / bill.consumption_kwh
            };
            let rate = energy_rate + surcharge_per_kwh;
            if rate.is_finite() && rate >= 0.0 {
                return (
                    Some(rate),
                    RateBasis::LatestBill {
                        identity: bill.identity.clone(),
                        tariff_flag: bill.tariff_flag,
                        surcharge_per_kwh,
                    },
                );
            }
        }
    }

    let (cost, kwh, count) = views
        .iter()
        .map(|v| &v.bill)
        .filter(|b| b.consumption_kwh > 0.0)
        .fold((0.0, 0.0, 0usize), |(c, k, n), b| {
            (c + b.total_cost, k + b.consumption_kwh, n + 1)
        });

    if count > 0 && kwh > 0.0 {
        (Some(cost / kwh), RateBasis::HistoricalAverage { bills: count })
    } else {
        (None, RateBasis::Unavailable)
    }
}
