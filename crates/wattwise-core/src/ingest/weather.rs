//! Weather ingestion
//!
//! Only dates that are missing or still forecast-only are requested. Each gap
//! is split into the provider's request ranges and those are fetched one at a
//! time; a range the provider fails to serve is recorded as a soft failure
//! and the run moves on, keeping what the other ranges returned.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate};
use tracing::{debug, info, warn};

use crate::config::WeatherConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{
    DateRange, FailedRange, IngestKind, Location, PutWeatherOutcome, WeatherIngestionReport,
    WeatherSource,
};
use crate::weather::WeatherProvider;

use super::with_timeout;

/// Days looked back when there are no bills to anchor the range
const DEFAULT_LOOKBACK_DAYS: i64 = 365;

/// Fills weather gaps from a provider
pub struct WeatherIngestor<'a, P: WeatherProvider> {
    db: &'a Database,
    provider: &'a P,
    timeout: Duration,
}

impl<'a, P: WeatherProvider> WeatherIngestor<'a, P> {
    pub fn new(db: &'a Database, provider: &'a P, timeout: Duration) -> Self {
        Self {
            db,
            provider,
            timeout,
        }
    }

    pub fn from_config(db: &'a Database, provider: &'a P, config: &WeatherConfig) -> Self {
        Self::new(db, provider, config.timeout)
    }

    /// Fetch and store weather for every missing or forecast-only date in `range`
    pub async fn ingest(
        &self,
        location: &Location,
        range: DateRange,
    ) -> Result<WeatherIngestionReport> {
        info!(
            location = %location.name,
            range = %range,
            provider = self.provider.name(),
            "Starting weather ingestion"
        );
        self.run(location, range).await
    }

    /// Fetch forecast days for an upcoming period
    ///
    /// Uses the same gap logic, so stored forecasts are refreshed and observed
    /// days are left alone.
    pub async fn ingest_outlook(
        &self,
        location: &Location,
        period: DateRange,
    ) -> Result<WeatherIngestionReport> {
        info!(
            location = %location.name,
            period = %period,
            provider = self.provider.name(),
            "Fetching weather outlook"
        );
        self.run(location, period).await
    }

    async fn run(&self, location: &Location, range: DateRange) -> Result<WeatherIngestionReport> {
        let run_id = self.db.start_ingest_run(IngestKind::Weather)?;
        let stored = self.db.weather_dates(&location.name, range)?;
        let gaps = find_gaps(&stored, range);
        debug!(gaps = gaps.len(), "Computed weather gaps");

        let mut report = WeatherIngestionReport::default();
        for gap in gaps {
            let requests = self.provider.request_ranges(gap);
            let requested: i64 = requests.iter().map(DateRange::days).sum();
            if requested < gap.days() {
                debug!(gap = %gap, "Part of the gap is beyond the provider's reach");
                report.unserved += (gap.days() - requested) as usize;
            }
            for request in requests {
                self.fetch_range(location, request, &mut report).await?;
            }
        }

        let detail = serde_json::to_string(&report)?;
        self.db.finish_ingest_run(
            run_id,
            (report.fetched + report.promoted + report.refreshed) as i64,
            (report.skipped + report.rejected) as i64,
            (report.invalid + report.failed_ranges.len()) as i64,
            Some(&detail),
        )?;

        info!(
            fetched = report.fetched,
            promoted = report.promoted,
            refreshed = report.refreshed,
            skipped = report.skipped,
            rejected = report.rejected,
            invalid = report.invalid,
            failed_ranges = report.failed_ranges.len(),
            unserved = report.unserved,
            "Weather ingestion complete"
        );
        Ok(report)
    }

    /// Fetch one request range and store what comes back
    ///
    /// Collaborator failures are recorded on the report; store errors abort.
    async fn fetch_range(
        &self,
        location: &Location,
        request: DateRange,
        report: &mut WeatherIngestionReport,
    ) -> Result<()> {
        let days = match with_timeout(self.timeout, self.provider.fetch_daily(location, request))
            .await
        {
            Ok(days) => days,
            Err(e) if e.is_collaborator() => {
                warn!(range = %request, error = %e, "Weather provider failed, skipping range");
                report.soft_failure = Some(e.to_string());
                report.failed_ranges.push(FailedRange {
                    range: request,
                    detail: e.to_string(),
                });
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for mut day in days {
            if !request.contains(day.date) {
                report.ignored += 1;
                continue;
            }
            day.location = location.name.clone();
            match self.db.put_weather(&day) {
                Ok(PutWeatherOutcome::Inserted) => report.fetched += 1,
                Ok(PutWeatherOutcome::Promoted) => report.promoted += 1,
                Ok(PutWeatherOutcome::SkippedDuplicate) => report.skipped += 1,
                Ok(PutWeatherOutcome::RejectedOlder) => report.rejected += 1,
                Ok(PutWeatherOutcome::Refreshed) => report.refreshed += 1,
                Err(Error::Validation(msg)) => {
                    debug!(date = %day.date, "Invalid weather day: {}", msg);
                    report.invalid += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Contiguous runs of dates in `range` that are absent or forecast-only
pub fn find_gaps(stored: &BTreeMap<NaiveDate, WeatherSource>, range: DateRange) -> Vec<DateRange> {
    let mut gaps = Vec::new();
    let mut open: Option<NaiveDate> = None;
    let mut last = range.start;

    for date in range.iter_days() {
        let needed = stored.get(&date) != Some(&WeatherSource::Observed);
        match (needed, open) {
            (true, None) => open = Some(date),
            (false, Some(start)) => {
                gaps.push(DateRange { start, end: last });
                open = None;
            }
            _ => {}
        }
        last = date;
    }
    if let Some(start) = open {
        gaps.push(DateRange {
            start,
            end: range.end,
        });
    }
    gaps
}

/// Default ingestion range: earliest bill start (or a year back) to the
/// archive horizon
///
/// None when the horizon falls before the start.
pub fn default_range(
    db: &Database,
    today: NaiveDate,
    archive_lag_days: i64,
) -> Result<Option<DateRange>> {
    let start = db
        .earliest_bill_start()?
        .unwrap_or(today - ChronoDuration::days(DEFAULT_LOOKBACK_DAYS));
    let end = today - ChronoDuration::days(archive_lag_days);
    Ok(DateRange::new(start, end).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeatherDay;
    use crate::test_utils::MockOpenMeteoServer;
    use crate::weather::{MockWeatherProvider, OpenMeteoProvider};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn range(a: NaiveDate, b: NaiveDate) -> DateRange {
        DateRange::new(a, b).unwrap()
    }

    fn home() -> Location {
        Location {
            name: "home".into(),
            latitude: -22.8,
            longitude: -43.4,
            timezone: "America/Sao_Paulo".into(),
        }
    }

    fn day(d: NaiveDate, mean: f64, source: WeatherSource) -> WeatherDay {
        WeatherDay {
            location: "home".into(),
            date: d,
            temp_min: mean - 4.0,
            temp_max: mean + 4.0,
            temp_mean: mean,
            source,
        }
    }

    fn observed_month(y: i32, m: u32, days: u32) -> Vec<WeatherDay> {
        (1..=days)
            .map(|d| day(date(y, m, d), 26.0, WeatherSource::Observed))
            .collect()
    }

    #[test]
    fn test_find_gaps_groups_contiguous_dates() {
        let mut stored = BTreeMap::new();
        stored.insert(date(2024, 1, 3), WeatherSource::Observed);
        stored.insert(date(2024, 1, 4), WeatherSource::Observed);
        stored.insert(date(2024, 1, 6), WeatherSource::Forecast);

        let gaps = find_gaps(&stored, range(date(2024, 1, 1), date(2024, 1, 7)));
        assert_eq!(
            gaps,
            vec![
                range(date(2024, 1, 1), date(2024, 1, 2)),
                range(date(2024, 1, 5), date(2024, 1, 7)),
            ]
        );
    }

    #[test]
    fn test_find_gaps_fully_observed() {
        let stored: BTreeMap<_, _> = range(date(2024, 1, 1), date(2024, 1, 3))
            .iter_days()
            .map(|d| (d, WeatherSource::Observed))
            .collect();
        assert!(find_gaps(&stored, range(date(2024, 1, 1), date(2024, 1, 3))).is_empty());
    }

    #[tokio::test]
    async fn test_ingest_requests_only_gaps() {
        let db = Database::in_memory().unwrap();
        for d in observed_month(2024, 1, 10) {
            db.put_weather(&d).unwrap();
        }
        let provider = MockWeatherProvider::new().with_days(observed_month(2024, 1, 31));
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 31)))
            .await
            .unwrap();

        assert_eq!(report.fetched, 21);
        assert_eq!(
            provider.requests(),
            vec![range(date(2024, 1, 11), date(2024, 1, 31))]
        );
        assert_eq!(db.weather_count("home").unwrap(), 31);
    }

    #[tokio::test]
    async fn test_forecast_days_are_promoted() {
        let db = Database::in_memory().unwrap();
        db.put_weather(&day(date(2024, 1, 5), 30.0, WeatherSource::Forecast))
            .unwrap();
        let provider = MockWeatherProvider::new().with_days(observed_month(2024, 1, 5));
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 5)))
            .await
            .unwrap();

        assert_eq!(report.fetched, 4);
        assert_eq!(report.promoted, 1);
        let stored = db
            .list_weather("home", DateRange::day(date(2024, 1, 5)))
            .unwrap();
        assert_eq!(stored[0].source, WeatherSource::Observed);
        assert_eq!(stored[0].temp_mean, 26.0);
    }

    #[tokio::test]
    async fn test_out_of_gap_and_invalid_days() {
        let db = Database::in_memory().unwrap();
        let mut broken = day(date(2024, 1, 2), 25.0, WeatherSource::Observed);
        broken.temp_min = 40.0;
        let provider = MockWeatherProvider::new()
            .with_days(vec![
                day(date(2024, 1, 1), 25.0, WeatherSource::Observed),
                broken,
            ])
            .with_extra_days(vec![day(date(2023, 12, 1), 25.0, WeatherSource::Observed)]);
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 2)))
            .await
            .unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.ignored, 1);
        assert_eq!(db.weather_count("home").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_soft_failure() {
        let db = Database::in_memory().unwrap();
        let provider = MockWeatherProvider::unreachable();
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 31)))
            .await
            .unwrap();

        assert!(report.soft_failure.is_some());
        assert_eq!(report.failed_ranges.len(), 1);
        assert_eq!(db.weather_count("home").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_gap_does_not_stop_later_gaps() {
        let db = Database::in_memory().unwrap();
        db.put_weather(&day(date(2024, 1, 3), 26.0, WeatherSource::Observed))
            .unwrap();
        let provider = MockWeatherProvider::new()
            .with_days(observed_month(2024, 1, 5))
            .failing_on(date(2024, 1, 1));
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 5)))
            .await
            .unwrap();

        assert_eq!(report.failed_ranges.len(), 1);
        assert_eq!(
            report.failed_ranges[0].range,
            range(date(2024, 1, 1), date(2024, 1, 2))
        );
        assert_eq!(report.fetched, 2);
    }

    #[tokio::test]
    async fn test_failed_request_range_keeps_the_rest_of_the_gap() {
        let db = Database::in_memory().unwrap();
        let provider = MockWeatherProvider::new()
            .with_days(observed_month(2024, 1, 31))
            .with_split_after(date(2024, 1, 20))
            .failing_on(date(2024, 1, 25));
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 31)))
            .await
            .unwrap();

        assert_eq!(
            provider.requests(),
            vec![
                range(date(2024, 1, 1), date(2024, 1, 20)),
                range(date(2024, 1, 21), date(2024, 1, 31)),
            ]
        );
        assert_eq!(report.fetched, 20);
        assert_eq!(report.failed_ranges.len(), 1);
        assert_eq!(
            report.failed_ranges[0].range,
            range(date(2024, 1, 21), date(2024, 1, 31))
        );
        assert_eq!(db.weather_count("home").unwrap(), 20);
    }

    #[tokio::test]
    async fn test_archive_days_survive_forecast_endpoint_outage() {
        let db = Database::in_memory().unwrap();
        let server = MockOpenMeteoServer::start().await;
        let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_url = format!("http://{}/v1/forecast", dead.local_addr().unwrap());
        drop(dead);
        let provider = OpenMeteoProvider::new(&server.archive_url(), &dead_url, 2)
            .with_today(date(2024, 6, 10));
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest(&home(), range(date(2024, 5, 1), date(2024, 6, 30)))
            .await
            .unwrap();

        // May 1 to June 8 from the archive; the forecast endpoint reaches June 25
        assert_eq!(server.request_count(), 1);
        assert_eq!(report.fetched, 39);
        assert_eq!(db.observed_weather_count("home").unwrap(), 39);
        assert_eq!(report.failed_ranges.len(), 1);
        assert_eq!(
            report.failed_ranges[0].range,
            range(date(2024, 6, 9), date(2024, 6, 25))
        );
        assert_eq!(report.unserved, 5);
        assert!(report.soft_failure.is_some());
    }

    #[tokio::test]
    async fn test_dates_beyond_reach_are_not_requested() {
        let db = Database::in_memory().unwrap();
        let provider = MockWeatherProvider::new()
            .with_days(observed_month(2024, 1, 31))
            .with_reach(date(2024, 1, 16));
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest_outlook(&home(), range(date(2024, 1, 1), date(2024, 1, 31)))
            .await
            .unwrap();

        assert_eq!(
            provider.requests(),
            vec![range(date(2024, 1, 1), date(2024, 1, 16))]
        );
        assert_eq!(report.fetched, 16);
        assert_eq!(report.unserved, 15);
        assert!(report.failed_ranges.is_empty());
        assert!(report.soft_failure.is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_soft_failure() {
        let db = Database::in_memory().unwrap();
        let provider = MockWeatherProvider::new()
            .with_days(observed_month(2024, 1, 3))
            .with_delay(Duration::from_secs(5));
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_millis(20));

        let report = ingestor
            .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 3)))
            .await
            .unwrap();

        assert!(report.soft_failure.is_some());
        assert_eq!(db.weather_count("home").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_outlook_refreshes_forecasts() {
        let db = Database::in_memory().unwrap();
        db.put_weather(&day(date(2024, 7, 1), 20.0, WeatherSource::Forecast))
            .unwrap();
        let provider = MockWeatherProvider::new().with_days(vec![
            day(date(2024, 7, 1), 22.0, WeatherSource::Forecast),
            day(date(2024, 7, 2), 23.0, WeatherSource::Forecast),
        ]);
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

        let report = ingestor
            .ingest_outlook(&home(), range(date(2024, 7, 1), date(2024, 7, 2)))
            .await
            .unwrap();

        assert_eq!(report.refreshed, 1);
        assert_eq!(report.fetched, 1);
    }

    #[tokio::test]
    async fn test_run_is_recorded() {
        let db = Database::in_memory().unwrap();
        let provider = MockWeatherProvider::new().with_days(observed_month(2024, 1, 3));
        let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));
        ingestor
            .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 3)))
            .await
            .unwrap();

        let runs = db.list_ingest_runs(Some(IngestKind::Weather), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].new_count, 3);
    }

    #[test]
    fn test_default_range_without_bills() {
        let db = Database::in_memory().unwrap();
        let today = date(2024, 6, 10);
        let r = default_range(&db, today, 2).unwrap().unwrap();
        assert_eq!(r.start, date(2023, 6, 11));
        assert_eq!(r.end, date(2024, 6, 8));
    }
}
