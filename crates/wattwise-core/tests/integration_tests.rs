//! Integration tests for wattwise-core
//!
//! These tests exercise the full ingest -> join -> forecast workflow against
//! a temporary store and mock collaborators.

use std::time::Duration;

use chrono::NaiveDate;
use wattwise_core::{
    db::Database,
    extract::{BillCandidate, DocumentRef, MockExtractor},
    forecast::{ForecastEngine, ForecastPolicy, ForecastWarning},
    ingest::{BillIngestOptions, BillIngestor, WeatherIngestor},
    join::TemporalJoin,
    models::{
        DateRange, Location, PutWeatherOutcome, TariffFlag, WeatherDay, WeatherSource,
    },
    weather::MockWeatherProvider,
    Error,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn range(a: NaiveDate, b: NaiveDate) -> DateRange {
    DateRange::new(a, b).unwrap()
}

fn home() -> Location {
    Location {
        name: "home".into(),
        latitude: -22.839445,
        longitude: -43.398826,
        timezone: "America/Sao_Paulo".into(),
    }
}

fn observed(d: NaiveDate, mean: f64) -> WeatherDay {
    WeatherDay {
        location: "home".into(),
        date: d,
        temp_min: mean - 3.0,
        temp_max: mean + 3.0,
        temp_mean: mean,
        source: WeatherSource::Observed,
    }
}

fn forecast_day(d: NaiveDate, mean: f64) -> WeatherDay {
    WeatherDay {
        source: WeatherSource::Forecast,
        ..observed(d, mean)
    }
}

fn bill_candidate(period: DateRange, kwh: f64, cost: f64) -> BillCandidate {
    BillCandidate {
        total_cost: Some(cost),
        consumption_kwh: Some(kwh),
        tariff_flag: TariffFlag::Green,
        surcharge: None,
        period_start: Some(period.start),
        period_end: Some(period.end),
        due_date: None,
        confidence: Some(0.9),
        next_reading: None,
        reference_month: None,
    }
}

fn doc(name: &str) -> DocumentRef {
    DocumentRef::from_bytes(name, format!("bill document {}", name).into_bytes())
}

/// Observed weather for every day in `period` at a constant mean
fn weather_for(period: DateRange, mean: f64) -> Vec<WeatherDay> {
    period.iter_days().map(|d| observed(d, mean)).collect()
}

// =============================================================================
// Ingestion
// =============================================================================

#[tokio::test]
async fn test_ingest_same_document_twice() {
    let db = Database::in_memory().expect("Failed to create test database");
    let jan = range(date(2024, 1, 1), date(2024, 1, 31));
    let extractor = MockExtractor::new().with_response("docA.pdf", bill_candidate(jan, 300.0, 270.0));
    let ingestor = BillIngestor::new(&db, &extractor, BillIngestOptions::default());
    let documents = vec![doc("docA.pdf")];

    let first = ingestor.ingest(&documents).await.unwrap();
    assert_eq!((first.new, first.skipped, first.failed_count()), (1, 0, 0));
    let after_first = db.list_bills().unwrap();

    let second = ingestor.ingest(&documents).await.unwrap();
    assert_eq!((second.new, second.skipped, second.failed_count()), (0, 1, 0));

    let after_second = db.list_bills().unwrap();
    assert_eq!(after_first.len(), after_second.len());
    assert_eq!(after_first[0].identity, after_second[0].identity);
    assert_eq!(after_first[0].ingested_at, after_second[0].ingested_at);
    assert_eq!(after_first[0].consumption_kwh, after_second[0].consumption_kwh);
}

#[tokio::test]
async fn test_mixed_batch_reports_every_document() {
    let db = Database::in_memory().unwrap();
    let jan = range(date(2024, 1, 1), date(2024, 1, 31));
    let feb = range(date(2024, 2, 1), date(2024, 2, 29));
    let extractor = MockExtractor::new()
        .with_response("jan.pdf", bill_candidate(jan, 300.0, 270.0))
        .with_response("feb.pdf", bill_candidate(feb, 280.0, 250.0))
        .with_failure("blurry.jpg", "could not read document");
    let ingestor = BillIngestor::new(&db, &extractor, BillIngestOptions::default());

    let report = ingestor
        .ingest(&[doc("jan.pdf"), doc("blurry.jpg"), doc("feb.pdf")])
        .await
        .unwrap();

    assert_eq!(report.new, 2);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.failed[0].source, "blurry.jpg");
    assert_eq!(db.bill_count().unwrap(), 2);
}

#[tokio::test]
async fn test_forecast_sample_after_observed_is_rejected() {
    let db = Database::in_memory().unwrap();
    let d = date(2024, 3, 10);
    assert_eq!(
        db.put_weather(&observed(d, 27.0)).unwrap(),
        PutWeatherOutcome::Inserted
    );
    assert_eq!(
        db.put_weather(&forecast_day(d, 31.0)).unwrap(),
        PutWeatherOutcome::RejectedOlder
    );

    let stored = db.list_weather("home", DateRange::day(d)).unwrap();
    assert_eq!(stored[0].source, WeatherSource::Observed);
    assert_eq!(stored[0].temp_mean, 27.0);
}

#[tokio::test]
async fn test_observed_days_never_change() {
    let db = Database::in_memory().unwrap();
    let d = date(2024, 3, 10);
    db.put_weather(&forecast_day(d, 30.0)).unwrap();
    db.put_weather(&observed(d, 27.0)).unwrap();
    db.put_weather(&observed(d, 28.0)).unwrap();
    db.put_weather(&forecast_day(d, 29.0)).unwrap();

    let stored = db.list_weather("home", DateRange::day(d)).unwrap();
    assert_eq!(stored[0].temp_mean, 27.0);
}

#[tokio::test]
async fn test_weather_outage_leaves_store_untouched() {
    let db = Database::in_memory().unwrap();
    let provider = MockWeatherProvider::unreachable();
    let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));

    let report = ingestor
        .ingest(&home(), range(date(2024, 1, 1), date(2024, 1, 31)))
        .await
        .expect("outage must not be fatal");

    assert!(report.soft_failure.is_some());
    assert_eq!(db.weather_count("home").unwrap(), 0);
}

// =============================================================================
// Join
// =============================================================================

#[tokio::test]
async fn test_join_coverage_with_missing_day() {
    let db = Database::in_memory().unwrap();
    let jan = range(date(2024, 1, 1), date(2024, 1, 31));
    let feb = range(date(2024, 2, 1), date(2024, 2, 28));
    let extractor = MockExtractor::new()
        .with_response("A.pdf", bill_candidate(jan, 300.0, 270.0))
        .with_response("B.pdf", bill_candidate(feb, 280.0, 250.0));
    BillIngestor::new(&db, &extractor, BillIngestOptions::default())
        .ingest(&[doc("A.pdf"), doc("B.pdf")])
        .await
        .unwrap();

    let weather: Vec<WeatherDay> = weather_for(range(date(2024, 1, 1), date(2024, 2, 28)), 26.0)
        .into_iter()
        .filter(|d| d.date != date(2024, 1, 15))
        .collect();
    let provider = MockWeatherProvider::new().with_days(weather);
    WeatherIngestor::new(&db, &provider, Duration::from_secs(5))
        .ingest(&home(), range(date(2024, 1, 1), date(2024, 2, 28)))
        .await
        .unwrap();

    let views = TemporalJoin::new(&db, "home", 18.0).join_all().unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].coverage_ratio, 30.0 / 31.0);
    assert_eq!(views[1].coverage_ratio, 1.0);
    assert_eq!(views[0].mean_of_daily_means, Some(26.0));
}

#[tokio::test]
async fn test_join_without_weather_is_null_not_zero() {
    let db = Database::in_memory().unwrap();
    let jan = range(date(2024, 1, 1), date(2024, 1, 31));
    let extractor = MockExtractor::new().with_response("A.pdf", bill_candidate(jan, 300.0, 270.0));
    BillIngestor::new(&db, &extractor, BillIngestOptions::default())
        .ingest(&[doc("A.pdf")])
        .await
        .unwrap();

    let views = TemporalJoin::new(&db, "home", 18.0).join_all().unwrap();
    assert_eq!(views[0].coverage_ratio, 0.0);
    assert_eq!(views[0].mean_of_daily_means, None);
    assert_eq!(views[0].min_of_daily_mins, None);
    assert_eq!(views[0].max_of_daily_maxs, None);
}

// =============================================================================
// Forecast
// =============================================================================

#[test]
fn test_forecast_with_zero_bills() {
    let db = Database::in_memory().unwrap();
    db.put_weather(&observed(date(2024, 1, 1), 25.0)).unwrap();
    let engine = ForecastEngine::new(&db, "home", ForecastPolicy::default(), 18.0);

    let err = engine
        .forecast(range(date(2024, 2, 1), date(2024, 2, 29)), &[])
        .unwrap_err();

    assert!(matches!(
        err,
        Error::InsufficientHistory {
            usable: 0,
            required: 2
        }
    ));
    assert_eq!(db.bill_count().unwrap(), 0);
    assert_eq!(db.weather_count("home").unwrap(), 1);
}

#[tokio::test]
async fn test_full_workflow_warmer_outlook_holds_warmest_point() {
    let db = Database::in_memory().unwrap();
    let periods = [
        (range(date(2024, 1, 1), date(2024, 1, 31)), 24.0, 250.0),
        (range(date(2024, 2, 1), date(2024, 2, 29)), 26.0, 300.0),
        (range(date(2024, 3, 1), date(2024, 3, 31)), 28.0, 360.0),
    ];

    let mut extractor = MockExtractor::new();
    let mut documents = Vec::new();
    let mut weather = Vec::new();
    for (i, (period, mean, kwh)) in periods.iter().enumerate() {
        let name = format!("bill-{}.pdf", i);
        extractor = extractor.with_response(&name, bill_candidate(*period, *kwh, kwh * 0.8));
        documents.push(doc(&name));
        weather.extend(weather_for(*period, *mean));
    }

    let report = BillIngestor::new(&db, &extractor, BillIngestOptions::default())
        .ingest(&documents)
        .await
        .unwrap();
    assert_eq!(report.new, 3);

    let provider = MockWeatherProvider::new().with_days(weather);
    WeatherIngestor::new(&db, &provider, Duration::from_secs(5))
        .ingest(&home(), range(date(2024, 1, 1), date(2024, 3, 31)))
        .await
        .unwrap();

    let engine = ForecastEngine::new(&db, "home", ForecastPolicy::default(), 18.0);
    let next = engine.next_period().unwrap().unwrap();
    assert_eq!(next.start, date(2024, 4, 1));
    assert_eq!(next.days(), 31);

    let outlook: Vec<WeatherDay> = next.iter_days().map(|d| forecast_day(d, 33.0)).collect();
    let result = engine.forecast(next, &outlook).unwrap();

    assert!(result.predicted_consumption_kwh >= 360.0);
    assert_eq!(result.basis.outlook_coverage, 1.0);
    assert!(result.basis.fallback_days.is_empty());
    let cost = result.predicted_cost.expect("green bills give a rate");
    assert!((cost - result.predicted_consumption_kwh * 0.8).abs() < 1e-6);
    assert!(result.confidence_band.kwh_low <= result.predicted_consumption_kwh);
    assert!(result.confidence_band.kwh_high >= result.predicted_consumption_kwh);
    assert!(!result
        .warnings
        .iter()
        .any(|w| matches!(w, ForecastWarning::NoRateInformation)));
}

#[tokio::test]
async fn test_forecast_from_stored_outlook() {
    let db = Database::in_memory().unwrap();
    let jan = range(date(2024, 1, 1), date(2024, 1, 31));
    let feb = range(date(2024, 2, 1), date(2024, 2, 29));
    let extractor = MockExtractor::new()
        .with_response("jan.pdf", bill_candidate(jan, 300.0, 270.0))
        .with_response("feb.pdf", bill_candidate(feb, 250.0, 225.0));
    BillIngestor::new(&db, &extractor, BillIngestOptions::default())
        .ingest(&[doc("jan.pdf"), doc("feb.pdf")])
        .await
        .unwrap();

    let mut weather = weather_for(jan, 28.0);
    weather.extend(weather_for(feb, 24.0));
    let march = range(date(2024, 3, 1), date(2024, 3, 31));
    let outlook: Vec<WeatherDay> = march
        .iter_days()
        .take(10)
        .map(|d| forecast_day(d, 26.0))
        .collect();
    let provider = MockWeatherProvider::new().with_days(weather);
    let ingestor = WeatherIngestor::new(&db, &provider, Duration::from_secs(5));
    ingestor
        .ingest(&home(), range(date(2024, 1, 1), date(2024, 2, 29)))
        .await
        .unwrap();
    provider.add_days(outlook);
    ingestor.ingest_outlook(&home(), march).await.unwrap();

    let engine = ForecastEngine::new(&db, "home", ForecastPolicy::default(), 18.0);
    let result = engine.forecast_from_store(march).unwrap();

    assert_eq!(result.basis.outlook_days, 10);
    assert_eq!(result.basis.fallback_days.len(), 21);
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, ForecastWarning::PartialOutlook { .. })));
}
