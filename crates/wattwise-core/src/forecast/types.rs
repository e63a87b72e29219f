//! Core types for the Forecast Engine

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{DateRange, TariffFlag};

use super::regression::FitKind;

/// Tunables for the forecast
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPolicy {
    /// Minimum number of bills with weather coverage
    pub min_history: usize,
    /// Band width in standard deviations (1.96 ~ 95%)
    pub z_score: f64,
    /// Floor on the spread, as a fraction of the prediction
    pub min_relative_sd: f64,
    /// How much a missing outlook widens the band
    pub deficit_weight: f64,
}

impl Default for ForecastPolicy {
    fn default() -> Self {
        Self {
            min_history: 2,
            z_score: 1.96,
            min_relative_sd: 0.05,
            deficit_weight: 1.0,
        }
    }
}

impl ForecastPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.min_history == 0 {
            return Err(Error::Config("forecast.min_history must be >= 1".into()));
        }
        if !(self.z_score.is_finite() && self.z_score > 0.0) {
            return Err(Error::Config("forecast.z_score must be > 0".into()));
        }
        if !(self.min_relative_sd.is_finite() && self.min_relative_sd > 0.0) {
            return Err(Error::Config("forecast.min_relative_sd must be > 0".into()));
        }
        if !(self.deficit_weight.is_finite() && self.deficit_weight > 0.0) {
            return Err(Error::Config("forecast.deficit_weight must be > 0".into()));
        }
        Ok(())
    }
}

/// How the energy rate was chosen
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateBasis {
    /// Implied rate of the most recent bill
    LatestBill {
        identity: String,
        tariff_flag: TariffFlag,
        /// Surcharge per kWh included in the rate
        surcharge_per_kwh: f64,
    },
    /// `sum(total_cost) / sum(consumption_kwh)` across all bills
    HistoricalAverage { bills: usize },
    /// No bill allows a rate to be derived
    Unavailable,
}

/// Non-fatal conditions attached to a forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecastWarning {
    /// Cost could not be estimated; consumption is still valid
    NoRateInformation,
    /// Outlook covers only part of the period; the rest uses seasonal averages
    PartialOutlook { outlook_days: usize, period_days: i64 },
    /// The fitted line fell below the extreme historical point and was held there
    ExtrapolationGuard { floor_kwh: f64 },
    /// The fitted line went negative and was clamped to zero
    ClampedToZero,
}

impl std::fmt::Display for ForecastWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRateInformation => write!(f, "no rate information, cost not estimated"),
            Self::PartialOutlook {
                outlook_days,
                period_days,
            } => write!(
                f,
                "outlook covers {} of {} days, remainder uses seasonal averages",
                outlook_days, period_days
            ),
            Self::ExtrapolationGuard { floor_kwh } => write!(
                f,
                "period is outside the historical temperature range, held at {:.1} kWh",
                floor_kwh
            ),
            Self::ClampedToZero => write!(f, "fitted consumption was negative, clamped to 0"),
        }
    }
}

/// Uncertainty band around the prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceBand {
    pub kwh_low: f64,
    pub kwh_high: f64,
    pub cost_low: Option<f64>,
    pub cost_high: Option<f64>,
}

/// What the forecast was built from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastBasis {
    /// Bills whose (temperature, consumption) entered the fit
    pub bill_identities: Vec<String>,
    pub fit: FitKind,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    pub residual_sd: Option<f64>,
    pub period_mean_temp: f64,
    pub outlook_days: usize,
    /// Dates that used seasonal or history averages instead of an outlook
    pub fallback_days: Vec<NaiveDate>,
    /// `outlook_days / period_days`
    pub outlook_coverage: f64,
    pub rate: Option<f64>,
    pub rate_basis: RateBasis,
}

/// Forecast of the next bill
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub next_period: DateRange,
    pub predicted_consumption_kwh: f64,
    pub predicted_cost: Option<f64>,
    pub confidence_band: ConfidenceBand,
    pub basis: ForecastBasis,
    pub warnings: Vec<ForecastWarning>,
}
