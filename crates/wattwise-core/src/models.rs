//! Domain models for Wattwise

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::Validation(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Single-day range
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Inclusive day count (`end - start + 1`)
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Iterate every date in the range, in order
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.days()).map(move |offset| start + Duration::days(offset))
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl std::str::FromStr for DateRange {
    type Err = String;

    /// Parses `YYYY-MM-DD..YYYY-MM-DD`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or_else(|| format!("Expected START..END, got: {}", s))?;
        let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")
            .map_err(|e| format!("Invalid start date '{}': {}", start, e))?;
        let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d")
            .map_err(|e| format!("Invalid end date '{}': {}", end, e))?;
        DateRange::new(start, end).map_err(|e| e.to_string())
    }
}

/// Tariff flag in effect for a billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TariffFlag {
    Green,
    Yellow,
    #[serde(rename = "red_1")]
    Red1,
    #[serde(rename = "red_2")]
    Red2,
    #[default]
    Unknown,
}

impl TariffFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red1 => "red_1",
            Self::Red2 => "red_2",
            Self::Unknown => "unknown",
        }
    }

    /// Whether bills under this flag carry a surcharge on top of the energy rate
    pub fn has_surcharge(&self) -> bool {
        matches!(self, Self::Yellow | Self::Red1 | Self::Red2)
    }
}

impl std::str::FromStr for TariffFlag {
    type Err = String;

    /// Accepts the canonical names plus the Portuguese labels printed on
    /// Brazilian bills ("Verde", "Amarela", "Vermelha Patamar 1", ...).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_lowercase()
            .replace(['-', ' '], "_")
            .replace("__", "_");
        match normalized.as_str() {
            "green" | "verde" => Ok(Self::Green),
            "yellow" | "amarela" | "amarelo" => Ok(Self::Yellow),
            "red_1" | "red1" | "red" | "vermelha" | "vermelha_1" | "vermelha_patamar_1"
            | "vermelha_p1" => Ok(Self::Red1),
            "red_2" | "red2" | "vermelha_2" | "vermelha_patamar_2" | "vermelha_p2" => {
                Ok(Self::Red2)
            }
            "unknown" | "" => Ok(Self::Unknown),
            _ => Err(format!("Unknown tariff flag: {}", s)),
        }
    }
}

impl std::fmt::Display for TariffFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bill as proposed for insertion (before the store stamps it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBill {
    /// SHA-256 of the source document, hex encoded
    pub identity: String,
    pub source_name: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub consumption_kwh: f64,
    pub total_cost: f64,
    pub tariff_flag: TariffFlag,
    pub surcharge: Option<f64>,
    pub extraction_confidence: Option<f64>,
    /// Utility's scheduled date for the next meter reading
    pub next_reading: Option<NaiveDate>,
    /// Reference month printed on the bill, e.g. "JANEIRO/2024"
    pub reference_month: Option<String>,
}

impl NewBill {
    /// Check the invariants every stored bill must satisfy
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(Error::Validation("identity must not be empty".into()));
        }
        if self.period_start > self.period_end {
            return Err(Error::Validation(format!(
                "period_start {} is after period_end {}",
                self.period_start, self.period_end
            )));
        }
        if !self.consumption_kwh.is_finite() || self.consumption_kwh < 0.0 {
            return Err(Error::Validation(format!(
                "consumption_kwh must be non-negative, got {}",
                self.consumption_kwh
            )));
        }
        if !self.total_cost.is_finite() || self.total_cost < 0.0 {
            return Err(Error::Validation(format!(
                "total_cost must be non-negative, got {}",
                self.total_cost
            )));
        }
        if let Some(surcharge) = self.surcharge {
            if !surcharge.is_finite() || surcharge < 0.0 {
                return Err(Error::Validation(format!(
                    "surcharge must be non-negative, got {}",
                    surcharge
                )));
            }
        }
        if let Some(next) = self.next_reading {
            if next <= self.period_end {
                return Err(Error::Validation(format!(
                    "next_reading {} is not after period_end {}",
                    next, self.period_end
                )));
            }
        }
        if let Some(confidence) = self.extraction_confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(Error::Validation(format!(
                    "extraction_confidence must be within [0, 1], got {}",
                    confidence
                )));
            }
        }
        Ok(())
    }
}

/// A stored bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub identity: String,
    pub source_name: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub consumption_kwh: f64,
    pub total_cost: f64,
    pub tariff_flag: TariffFlag,
    pub surcharge: Option<f64>,
    pub extraction_confidence: Option<f64>,
    pub next_reading: Option<NaiveDate>,
    pub reference_month: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

impl Bill {
    pub fn period(&self) -> DateRange {
        DateRange {
            start: self.period_start,
            end: self.period_end,
        }
    }

    /// Short form of the identity for display
    pub fn short_identity(&self) -> &str {
        match self.identity.char_indices().nth(12) {
            Some((end, _)) => &self.identity[..end],
            None => &self.identity,
        }
    }

    /// Reference month, or the period end's month when the bill had none
    pub fn month_label(&self) -> String {
        self.reference_month
            .clone()
            .unwrap_or_else(|| self.period_end.format("%m/%Y").to_string())
    }
}

/// Result of `Database::put_bill`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PutBillOutcome {
    Inserted,
    SkippedDuplicate,
    Replaced,
}

/// Origin of a weather sample; observed data outranks forecasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherSource {
    Forecast,
    Observed,
}

impl WeatherSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forecast => "forecast",
            Self::Observed => "observed",
        }
    }
}

impl std::str::FromStr for WeatherSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "observed" => Ok(Self::Observed),
            "forecast" => Ok(Self::Forecast),
            _ => Err(format!("Unknown weather source: {}", s)),
        }
    }
}

impl std::fmt::Display for WeatherSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Daily temperature summary for one location, in Celsius
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDay {
    pub location: String,
    pub date: NaiveDate,
    pub temp_min: f64,
    pub temp_max: f64,
    pub temp_mean: f64,
    pub source: WeatherSource,
}

impl WeatherDay {
    pub fn validate(&self) -> Result<()> {
        if !(self.temp_min.is_finite() && self.temp_max.is_finite() && self.temp_mean.is_finite())
        {
            return Err(Error::Validation(format!(
                "non-finite temperature on {}",
                self.date
            )));
        }
        if self.temp_min > self.temp_max {
            return Err(Error::Validation(format!(
                "temp_min {} above temp_max {} on {}",
                self.temp_min, self.temp_max, self.date
            )));
        }
        Ok(())
    }

    /// Same readings, ignoring source and location
    pub fn same_values(&self, other: &WeatherDay) -> bool {
        self.temp_min == other.temp_min
            && self.temp_max == other.temp_max
            && self.temp_mean == other.temp_mean
    }
}

/// Result of `Database::put_weather`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PutWeatherOutcome {
    Inserted,
    SkippedDuplicate,
    /// An observed sample replaced a forecast for the same date
    Promoted,
    /// A forecast arrived for a date that already has an observation
    RejectedOlder,
    /// A newer forecast replaced an older forecast
    Refreshed,
}

/// A configured weather location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Store key for weather rows
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// IANA timezone used to cut daily aggregates
    pub timezone: String,
}

// =============================================================================
// Ingestion reports
// =============================================================================

/// Why a single item failed during an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ValidationError,
    ExtractionError,
    PossibleDuplicatePeriod,
    NeedsConfirmation,
    ReadError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::ExtractionError => "extraction_error",
            Self::PossibleDuplicatePeriod => "possible_duplicate_period",
            Self::NeedsConfirmation => "needs_confirmation",
            Self::ReadError => "read_error",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A document that could not be ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub source: String,
    pub reason: FailureReason,
    pub detail: String,
}

/// Summary of a bill ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillIngestionReport {
    pub new: usize,
    pub skipped: usize,
    /// Bills overwritten by an explicit re-extract
    pub replaced: usize,
    pub failed: Vec<FailedDocument>,
}

impl BillIngestionReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// A date gap the weather provider could not serve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRange {
    pub range: DateRange,
    pub detail: String,
}

/// Summary of a weather ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherIngestionReport {
    /// Days newly inserted
    pub fetched: usize,
    /// Forecast days replaced by observations
    pub promoted: usize,
    /// Returned days that changed nothing
    pub skipped: usize,
    /// Forecast days refused because an observation exists
    pub rejected: usize,
    /// Forecast days replaced by a newer forecast
    pub refreshed: usize,
    /// Returned days that failed validation
    pub invalid: usize,
    /// Returned days outside the requested gap
    pub ignored: usize,
    /// Gap dates beyond the provider's reach, left unrequested
    pub unserved: usize,
    pub failed_ranges: Vec<FailedRange>,
    /// Set when the provider could not be reached for at least one gap
    pub soft_failure: Option<String>,
}

/// Kind of ingestion run recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestKind {
    Bills,
    Weather,
}

impl IngestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bills => "bills",
            Self::Weather => "weather",
        }
    }
}

impl std::str::FromStr for IngestKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bills" => Ok(Self::Bills),
            "weather" => Ok(Self::Weather),
            _ => Err(format!("Unknown ingest kind: {}", s)),
        }
    }
}

/// A recorded ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct IngestRun {
    pub id: i64,
    pub kind: IngestKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub new_count: i64,
    pub skipped_count: i64,
    pub failed_count: i64,
    /// JSON of the full report
    pub detail: Option<String>,
}
