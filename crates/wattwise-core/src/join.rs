//! Temporal join between billing periods and daily weather
//!
//! A bill's period is inclusive on both ends. Every view is recomputed from
//! the store on demand; nothing here is cached or persisted.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::db::Database;
use crate::error::Result;
use crate::models::{Bill, DateRange, WeatherDay};

/// A bill with the weather aggregates for its period
///
/// Aggregates are `None` when no weather day falls inside the period, so
/// missing data never reads as 0 °C.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedBillView {
    pub bill: Bill,
    pub mean_of_daily_means: Option<f64>,
    pub min_of_daily_mins: Option<f64>,
    pub max_of_daily_maxs: Option<f64>,
    pub heating_degree_days: Option<f64>,
    pub cooling_degree_days: Option<f64>,
    pub covered_days: i64,
    pub period_days: i64,
    /// `covered_days / period_days`
    pub coverage_ratio: f64,
    /// True when some day in the period has no weather sample
    pub partial: bool,
}

impl JoinedBillView {
    pub fn has_weather(&self) -> bool {
        self.covered_days > 0
    }
}

/// Join one bill against a set of weather days (pure)
///
/// Days outside the bill period are ignored. If a date appears more than
/// once, the first occurrence wins.
pub fn join_bill(bill: &Bill, days: &[WeatherDay], degree_day_base_c: f64) -> JoinedBillView {
    let period = bill.period();

    let mut inside: BTreeMap<NaiveDate, &WeatherDay> = BTreeMap::new();
    for day in days.iter().filter(|d| period.contains(d.date)) {
        inside.entry(day.date).or_insert(day);
    }

    let period_days = period.days();
    let covered_days = inside.len() as i64;

    let (mean, min, max, hdd, cdd) = if inside.is_empty() {
        (None, None, None, None, None)
    } else {
        let n = inside.len() as f64;
        let mean = inside.values().map(|d| d.temp_mean).sum::<f64>() / n;
        let min = inside
            .values()
            .map(|d| d.temp_min)
            .fold(f64::INFINITY, f64::min);
        let max = inside
            .values()
            .map(|d| d.temp_max)
            .fold(f64::NEG_INFINITY, f64::max);
        let hdd = inside
            .values()
            .map(|d| (degree_day_base_c - d.temp_mean).max(0.0))
            .sum::<f64>();
        let cdd = inside
            .values()
            .map(|d| (d.temp_mean - degree_day_base_c).max(0.0))
            .sum::<f64>();
        (Some(mean), Some(min), Some(max), Some(hdd), Some(cdd))
    };

    JoinedBillView {
        bill: bill.clone(),
        mean_of_daily_means: mean,
        min_of_daily_mins: min,
        max_of_daily_maxs: max,
        heating_degree_days: hdd,
        cooling_degree_days: cdd,
        covered_days,
        period_days,
        coverage_ratio: covered_days as f64 / period_days as f64,
        partial: covered_days < period_days,
    }
}

/// Join engine reading bills and weather from the store
pub struct TemporalJoin<'a> {
    db: &'a Database,
    location: String,
    degree_day_base_c: f64,
}

impl<'a> TemporalJoin<'a> {
    pub fn new(db: &'a Database, location: &str, degree_day_base_c: f64) -> Self {
        Self {
            db,
            location: location.to_string(),
            degree_day_base_c,
        }
    }

    /// Join a single bill
    pub fn join(&self, bill: &Bill) -> Result<JoinedBillView> {
        let days = self.db.list_weather(&self.location, bill.period())?;
        Ok(join_bill(bill, &days, self.degree_day_base_c))
    }

    /// Join every stored bill, ordered by period start
    pub fn join_all(&self) -> Result<Vec<JoinedBillView>> {
        let bills = self.db.list_bills()?;
        let Some(span) = span_of(&bills) else {
            return Ok(Vec::new());
        };

        let days = self.db.list_weather(&self.location, span)?;
        Ok(bills
            .iter()
            .map(|bill| join_bill(bill, &days, self.degree_day_base_c))
            .collect())
    }
}

/// Smallest range covering every bill period
fn span_of(bills: &[Bill]) -> Option<DateRange> {
    let start = bills.iter().map(|b| b.period_start).min()?;
    let end = bills.iter().map(|b| b.period_end).max()?;
    Some(DateRange { start, end })
}

/// Headline figures across every joined bill
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinSummary {
    pub bills: usize,
    pub total_cost: f64,
    pub total_consumption_kwh: f64,
    /// Mean bill amount (one bill per month)
    pub mean_monthly_cost: Option<f64>,
    /// Mean of the period means, over bills with weather
    pub mean_temperature: Option<f64>,
    pub bills_with_weather: usize,
}

impl JoinSummary {
    pub fn from_views(views: &[JoinedBillView]) -> Self {
        let total_cost: f64 = views.iter().map(|v| v.bill.total_cost).sum();
        let temps: Vec<f64> = views.iter().filter_map(|v| v.mean_of_daily_means).collect();

        Self {
            bills: views.len(),
            total_cost,
            total_consumption_kwh: views.iter().map(|v| v.bill.consumption_kwh).sum(),
            mean_monthly_cost: (!views.is_empty()).then(|| total_cost / views.len() as f64),
            mean_temperature: (!temps.is_empty())
                .then(|| temps.iter().sum::<f64>() / temps.len() as f64),
            bills_with_weather: temps.len(),
        }
    }
}

/// Flat CSV row for external charting tools
#[derive(Debug, Serialize)]
struct JoinedRow<'a> {
    identity: &'a str,
    source_name: Option<&'a str>,
    reference_month: Option<&'a str>,
    period_start: NaiveDate,
    period_end: NaiveDate,
    consumption_kwh: f64,
    total_cost: f64,
    tariff_flag: &'static str,
    surcharge: Option<f64>,
    mean_temp_c: Option<f64>,
    min_temp_c: Option<f64>,
    max_temp_c: Option<f64>,
    heating_degree_days: Option<f64>,
    cooling_degree_days: Option<f64>,
    covered_days: i64,
    period_days: i64,
    coverage_ratio: f64,
}

/// Write joined views as CSV (header row included)
pub fn write_csv<W: Write>(views: &[JoinedBillView], writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    for view in views {
        out.serialize(JoinedRow {
            identity: &view.bill.identity,
            source_name: view.bill.source_name.as_deref(),
            reference_month: view.bill.reference_month.as_deref(),
            period_start: view.bill.period_start,
            period_end: view.bill.period_end,
            consumption_kwh: view.bill.consumption_kwh,
            total_cost: view.bill.total_cost,
            tariff_flag: view.bill.tariff_flag.as_str(),
            surcharge: view.bill.surcharge,
            mean_temp_c: view.mean_of_daily_means,
            min_temp_c: view.min_of_daily_mins,
            max_temp_c: view.max_of_daily_maxs,
            heating_degree_days: view.heating_degree_days,
            cooling_degree_days: view.cooling_degree_days,
            covered_days: view.covered_days,
            period_days: view.period_days,
            coverage_ratio: view.coverage_ratio,
        })?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBill, TariffFlag, WeatherSource};
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bill(start: NaiveDate, end: NaiveDate) -> Bill {
        Bill {
            identity: "a".into(),
            source_name: None,
            period_start: start,
            period_end: end,
            due_date: None,
            consumption_kwh: 200.0,
            total_cost: 180.0,
            tariff_flag: TariffFlag::Green,
            surcharge: None,
            extraction_confidence: None,
            next_reading: None,
            reference_month: None,
            ingested_at: Utc::now(),
        }
    }

    fn day(d: NaiveDate, min: f64, mean: f64, max: f64) -> WeatherDay {
        WeatherDay {
            location: "home".into(),
            date: d,
            temp_min: min,
            temp_max: max,
            temp_mean: mean,
            source: WeatherSource::Observed,
        }
    }

    #[test]
    fn test_full_coverage_aggregates() {
        let b = bill(date(2024, 1, 1), date(2024, 1, 3));
        let days = vec![
            day(date(2024, 1, 1), 20.0, 24.0, 30.0),
            day(date(2024, 1, 2), 18.0, 22.0, 28.0),
            day(date(2024, 1, 3), 21.0, 26.0, 33.0),
        ];

        let view = join_bill(&b, &days, 18.0);
        assert_eq!(view.coverage_ratio, 1.0);
        assert!(!view.partial);
        assert!((view.mean_of_daily_means.unwrap() - 24.0).abs() < 1e-9);
        assert_eq!(view.min_of_daily_mins, Some(18.0));
        assert_eq!(view.max_of_daily_maxs, Some(33.0));
        assert!((view.cooling_degree_days.unwrap() - 18.0).abs() < 1e-9);
        assert_eq!(view.heating_degree_days, Some(0.0));
    }

    #[test]
    fn test_partial_coverage_ratio() {
        let b = bill(date(2024, 1, 1), date(2024, 1, 31));
        let days: Vec<WeatherDay> = DateRange::new(date(2024, 1, 1), date(2024, 1, 31))
            .unwrap()
            .iter_days()
            .filter(|d| *d != date(2024, 1, 15))
            .map(|d| day(d, 20.0, 25.0, 30.0))
            .collect();

        let view = join_bill(&b, &days, 18.0);
        assert_eq!(view.covered_days, 30);
        assert_eq!(view.period_days, 31);
        assert_eq!(view.coverage_ratio, 30.0 / 31.0);
        assert!(view.partial);
    }

    #[test]
    fn test_zero_coverage_yields_null_aggregates() {
        let b = bill(date(2024, 1, 1), date(2024, 1, 31));
        let outside = vec![day(date(2024, 2, 1), 20.0, 25.0, 30.0)];

        let view = join_bill(&b, &outside, 18.0);
        assert_eq!(view.coverage_ratio, 0.0);
        assert!(view.mean_of_daily_means.is_none());
        assert!(view.min_of_daily_mins.is_none());
        assert!(view.max_of_daily_maxs.is_none());
        assert!(view.heating_degree_days.is_none());
        assert!(!view.has_weather());
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let b = bill(date(2024, 1, 10), date(2024, 1, 11));
        let days = vec![
            day(date(2024, 1, 9), 0.0, 0.0, 0.0),
            day(date(2024, 1, 10), 20.0, 20.0, 20.0),
            day(date(2024, 1, 11), 30.0, 30.0, 30.0),
            day(date(2024, 1, 12), 0.0, 0.0, 0.0),
        ];
        let view = join_bill(&b, &days, 18.0);
        assert_eq!(view.covered_days, 2);
        assert_eq!(view.mean_of_daily_means, Some(25.0));
    }

    #[test]
    fn test_join_all_from_store() {
        let db = Database::in_memory().unwrap();
        for (id, start, end) in [
            ("a", date(2024, 1, 1), date(2024, 1, 31)),
            ("b", date(2024, 2, 1), date(2024, 2, 28)),
        ] {
            db.put_bill(
                &NewBill {
                    identity: id.into(),
                    source_name: None,
                    period_start: start,
                    period_end: end,
                    due_date: None,
                    consumption_kwh: 100.0,
                    total_cost: 90.0,
                    tariff_flag: TariffFlag::Green,
                    surcharge: None,
                    extraction_confidence: None,
                    next_reading: None,
                    reference_month: None,
                },
                false,
            )
            .unwrap();
        }
        for d in DateRange::new(date(2024, 1, 1), date(2024, 1, 31))
            .unwrap()
            .iter_days()
            .filter(|d| *d != date(2024, 1, 20))
        {
            db.put_weather(&day(d, 20.0, 25.0, 30.0)).unwrap();
        }

        let views = TemporalJoin::new(&db, "home", 18.0).join_all().unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].coverage_ratio, 30.0 / 31.0);
        assert_eq!(views[1].coverage_ratio, 0.0);

        let single = TemporalJoin::new(&db, "home", 18.0)
            .join(&views[0].bill)
            .unwrap();
        assert_eq!(single, views[0]);
    }

    #[test]
    fn test_summary_skips_missing_weather() {
        let jan = bill(date(2024, 1, 1), date(2024, 1, 2));
        let mut feb = bill(date(2024, 2, 1), date(2024, 2, 2));
        feb.total_cost = 300.0;
        feb.consumption_kwh = 100.0;
        let days = vec![
            day(date(2024, 1, 1), 20.0, 25.0, 30.0),
            day(date(2024, 1, 2), 22.0, 27.0, 32.0),
        ];
        let views = vec![join_bill(&jan, &days, 18.0), join_bill(&feb, &days, 18.0)];

        let summary = JoinSummary::from_views(&views);
        assert_eq!(summary.bills, 2);
        assert_eq!(summary.bills_with_weather, 1);
        assert_eq!(summary.total_cost, jan.total_cost + 300.0);
        assert_eq!(summary.mean_temperature, views[0].mean_of_daily_means);
        assert_eq!(JoinSummary::from_views(&[]).mean_monthly_cost, None);
    }

    #[test]
    fn test_write_csv_has_header_and_rows() {
        let b = bill(date(2024, 1, 1), date(2024, 1, 2));
        let views = vec![join_bill(&b, &[day(date(2024, 1, 1), 20.0, 25.0, 30.0)], 18.0)];

        let mut buf = Vec::new();
        write_csv(&views, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("identity,source_name,period_start"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("a,,2024-01-01,2024-01-02,200.0,180.0,green"));
        assert!(row.ends_with(",1,2,0.5"));
    }
}
