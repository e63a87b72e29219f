//! Open-Meteo provider
//!
//! Days up to `today - archive_lag_days` come from the historical archive and
//! are `observed`. Later days come from the forecast endpoint and are stored
//! as `forecast` until the archive catches up. The forecast endpoint only
//! looks `max_forecast_days` ahead; dates past that are never requested.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::WeatherConfig;
use crate::error::{Error, Result};
use crate::models::{DateRange, Location, WeatherDay, WeatherSource};

use super::WeatherProvider;

const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,temperature_2m_mean";

/// Forecast endpoint reach, today included
pub const DEFAULT_MAX_FORECAST_DAYS: i64 = 16;

/// Open-Meteo HTTP client
#[derive(Clone)]
pub struct OpenMeteoProvider {
    http_client: Client,
    archive_url: String,
    forecast_url: String,
    archive_lag_days: i64,
    max_forecast_days: i64,
    /// Fixed "today" (for tests); the UTC date when unset
    today: Option<NaiveDate>,
}

impl OpenMeteoProvider {
    pub fn new(archive_url: &str, forecast_url: &str, archive_lag_days: i64) -> Self {
        Self {
            http_client: Client::new(),
            archive_url: archive_url.to_string(),
            forecast_url: forecast_url.to_string(),
            archive_lag_days,
            max_forecast_days: DEFAULT_MAX_FORECAST_DAYS,
            today: None,
        }
    }

    pub fn from_config(config: &WeatherConfig) -> Self {
        Self::new(
            &config.archive_url,
            &config.forecast_url,
            config.archive_lag_days,
        )
        .with_max_forecast_days(config.max_forecast_days)
    }

    pub fn with_max_forecast_days(mut self, days: i64) -> Self {
        self.max_forecast_days = days.max(1);
        self
    }

    /// Pin the reference date used to split archive and forecast requests
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Last date the archive is expected to serve
    pub fn archive_horizon(&self) -> NaiveDate {
        self.today() - Duration::days(self.archive_lag_days)
    }

    /// Last date the forecast endpoint serves
    pub fn forecast_horizon(&self) -> NaiveDate {
        self.today() + Duration::days(self.max_forecast_days - 1)
    }

    /// Split `range` into the archive part and the forecast part
    ///
    /// The forecast part stops at the forecast horizon; it is None when
    /// nothing in it can be served.
    fn split(&self, range: DateRange) -> (Option<DateRange>, Option<DateRange>) {
        let horizon = self.archive_horizon();
        let archive = DateRange::new(range.start, range.end.min(horizon)).ok();
        let forecast = DateRange::new(
            range.start.max(horizon + Duration::days(1)),
            range.end.min(self.forecast_horizon()),
        )
        .ok();
        (archive, forecast)
    }

    async fn fetch(
        &self,
        url: &str,
        location: &Location,
        range: DateRange,
        source: WeatherSource,
    ) -> Result<Vec<WeatherDay>> {
        debug!(url = %url, range = %range, source = %source, "Fetching Open-Meteo daily data");

        let response = self
            .http_client
            .get(url)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("start_date", range.start.to_string()),
                ("end_date", range.end.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("timezone", location.timezone.clone()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: OpenMeteoResponse = response.json().await?;
        body.daily
            .ok_or_else(|| Error::Collaborator("Open-Meteo response has no daily block".into()))?
            .into_days(&location.name, source)
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    daily: Option<DailyBlock>,
}

/// Column-oriented daily arrays; any value may be null
#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_mean: Option<Vec<Option<f64>>>,
}

impl DailyBlock {
    /// Zip the columns into days, dropping dates with missing readings
    fn into_days(self, location: &str, source: WeatherSource) -> Result<Vec<WeatherDay>> {
        let n = self.time.len();
        if self.temperature_2m_max.len() != n || self.temperature_2m_min.len() != n {
            return Err(Error::Collaborator(
                "Open-Meteo daily arrays have mismatched lengths".into(),
            ));
        }

        let mut days = Vec::with_capacity(n);
        for (i, time) in self.time.iter().enumerate() {
            let date = NaiveDate::parse_from_str(time, "%Y-%m-%d").map_err(|e| {
                Error::Collaborator(format!("Open-Meteo returned bad date '{}': {}", time, e))
            })?;
            let (Some(max), Some(min)) = (self.temperature_2m_max[i], self.temperature_2m_min[i])
            else {
                continue;
            };
            let mean = self
                .temperature_2m_mean
                .as_ref()
                .and_then(|m| m.get(i).copied().flatten())
                .unwrap_or((min + max) / 2.0);

            days.push(WeatherDay {
                location: location.to_string(),
                date,
                temp_min: min,
                temp_max: max,
                temp_mean: mean,
                source,
            });
        }
        Ok(days)
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn fetch_daily(&self, location: &Location, range: DateRange) -> Result<Vec<WeatherDay>> {
        let (archive, forecast) = self.split(range);

        let mut days = Vec::new();
        if let Some(r) = archive {
            days.extend(
                self.fetch(&self.archive_url, location, r, WeatherSource::Observed)
                    .await?,
            );
        }
        if let Some(r) = forecast {
            days.extend(
                self.fetch(&self.forecast_url, location, r, WeatherSource::Forecast)
                    .await?,
            );
        }
        Ok(days)
    }

    fn request_ranges(&self, range: DateRange) -> Vec<DateRange> {
        let (archive, forecast) = self.split(range);
        archive.into_iter().chain(forecast).collect()
    }

    fn name(&self) -> &str {
        "open-meteo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn provider() -> OpenMeteoProvider {
        OpenMeteoProvider::new("http://archive", "http://forecast", 2).with_today(date(2024, 6, 10))
    }

    #[test]
    fn test_split_entirely_archive() {
        let range = DateRange::new(date(2024, 5, 1), date(2024, 6, 8)).unwrap();
        assert_eq!(provider().split(range), (Some(range), None));
    }

    #[test]
    fn test_split_entirely_forecast() {
        let range = DateRange::new(date(2024, 6, 9), date(2024, 6, 20)).unwrap();
        assert_eq!(provider().split(range), (None, Some(range)));
    }

    #[test]
    fn test_split_straddles_horizon() {
        let range = DateRange::new(date(2024, 6, 1), date(2024, 6, 20)).unwrap();
        let (archive, forecast) = provider().split(range);
        assert_eq!(archive.unwrap().end, date(2024, 6, 8));
        assert_eq!(forecast.unwrap().start, date(2024, 6, 9));
    }

    #[test]
    fn test_split_stops_at_forecast_horizon() {
        // Today plus 15 days is the last date the forecast endpoint serves
        let range = DateRange::new(date(2024, 6, 1), date(2024, 7, 10)).unwrap();
        let (archive, forecast) = provider().split(range);
        assert_eq!(
            archive,
            Some(DateRange::new(date(2024, 6, 1), date(2024, 6, 8)).unwrap())
        );
        assert_eq!(
            forecast,
            Some(DateRange::new(date(2024, 6, 9), date(2024, 6, 25)).unwrap())
        );
    }

    #[test]
    fn test_split_beyond_forecast_horizon() {
        let range = DateRange::new(date(2024, 7, 1), date(2024, 7, 31)).unwrap();
        assert_eq!(provider().split(range), (None, None));
        assert!(provider().request_ranges(range).is_empty());
    }

    #[test]
    fn test_request_ranges_split_at_archive_horizon() {
        let p = provider().with_max_forecast_days(7);
        let range = DateRange::new(date(2024, 6, 5), date(2024, 6, 30)).unwrap();
        assert_eq!(
            p.request_ranges(range),
            vec![
                DateRange::new(date(2024, 6, 5), date(2024, 6, 8)).unwrap(),
                DateRange::new(date(2024, 6, 9), date(2024, 6, 16)).unwrap(),
            ]
        );
    }

    #[test]
    fn test_daily_block_skips_nulls_and_derives_mean() {
        let block: DailyBlock = serde_json::from_str(
            r#"{
                "time": ["2024-01-01", "2024-01-02", "2024-01-03"],
                "temperature_2m_max": [30.0, null, 32.0],
                "temperature_2m_min": [20.0, 21.0, 22.0]
            }"#,
        )
        .unwrap();

        let days = block.into_days("home", WeatherSource::Observed).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].temp_mean, 25.0);
        assert_eq!(days[1].date, date(2024, 1, 3));
    }

    #[test]
    fn test_daily_block_length_mismatch() {
        let block: DailyBlock = serde_json::from_str(
            r#"{"time": ["2024-01-01"], "temperature_2m_max": [], "temperature_2m_min": [1.0]}"#,
        )
        .unwrap();
        assert!(block.into_days("home", WeatherSource::Observed).is_err());
    }
}
