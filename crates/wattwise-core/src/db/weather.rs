//! Weather day operations
//!
//! Each `(location, date)` key moves through a small state machine:
//! absent -> forecast -> observed. Observed rows are terminal.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{parse_date, Database};
use crate::error::Result;
use crate::models::{DateRange, PutWeatherOutcome, WeatherDay, WeatherSource};

impl Database {
    /// Write a weather sample under the promotion rules
    ///
    /// | stored    | incoming  | result                                   |
    /// |-----------|-----------|------------------------------------------|
    /// | none      | any       | `Inserted`                               |
    /// | observed  | observed  | `SkippedDuplicate`                       |
    /// | observed  | forecast  | `RejectedOlder`                          |
    /// | forecast  | observed  | `Promoted`                               |
    /// | forecast  | forecast  | `Refreshed`, or `SkippedDuplicate` if equal |
    pub fn put_weather(&self, day: &WeatherDay) -> Result<PutWeatherOutcome> {
        day.validate()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<(f64, f64, f64, String)> = tx
            .query_row(
                "SELECT temp_min, temp_max, temp_mean, source FROM weather_days
                 WHERE location = ? AND date = ?",
                params![day.location, day.date.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO weather_days (location, date, temp_min, temp_max, temp_mean, source)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        day.location,
                        day.date.to_string(),
                        day.temp_min,
                        day.temp_max,
                        day.temp_mean,
                        day.source.as_str(),
                    ],
                )?;
                PutWeatherOutcome::Inserted
            }
            Some((min, max, mean, source)) => {
                let stored_source: WeatherSource = source.parse().map_err(|e: String| {
                    crate::error::Error::StoreCorruption(format!(
                        "weather_days {} {}: {}",
                        day.location, day.date, e
                    ))
                })?;
                let same = min == day.temp_min && max == day.temp_max && mean == day.temp_mean;

                match (stored_source, day.source) {
                    (WeatherSource::Observed, WeatherSource::Observed) => {
                        PutWeatherOutcome::SkippedDuplicate
                    }
                    (WeatherSource::Observed, WeatherSource::Forecast) => {
                        PutWeatherOutcome::RejectedOlder
                    }
                    (WeatherSource::Forecast, WeatherSource::Forecast) if same => {
                        PutWeatherOutcome::SkippedDuplicate
                    }
                    (WeatherSource::Forecast, incoming) => {
                        tx.execute(
                            "UPDATE weather_days SET temp_min = ?, temp_max = ?, temp_mean = ?,
                             source = ?, updated_at = CURRENT_TIMESTAMP
                             WHERE location = ? AND date = ?",
                            params![
                                day.temp_min,
                                day.temp_max,
                                day.temp_mean,
                                incoming.as_str(),
                                day.location,
                                day.date.to_string(),
                            ],
                        )?;
                        if incoming == WeatherSource::Observed {
                            PutWeatherOutcome::Promoted
                        } else {
                            PutWeatherOutcome::Refreshed
                        }
                    }
                }
            }
        };

        tx.commit()?;
        debug!(location = %day.location, date = %day.date, outcome = ?outcome, "put_weather");
        Ok(outcome)
    }

    /// Weather days for a location within `range`, ordered by date
    pub fn list_weather(&self, location: &str, range: DateRange) -> Result<Vec<WeatherDay>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT location, date, temp_min, temp_max, temp_mean, source FROM weather_days
             WHERE location = ? AND date >= ? AND date <= ?
             ORDER BY date ASC",
        )?;

        let days = stmt
            .query_map(
                params![location, range.start.to_string(), range.end.to_string()],
                Self::row_to_weather_day,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(days)
    }

    /// Stored dates within `range` and the source of each
    pub fn weather_dates(
        &self,
        location: &str,
        range: DateRange,
    ) -> Result<BTreeMap<NaiveDate, WeatherSource>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, source FROM weather_days
             WHERE location = ? AND date >= ? AND date <= ?",
        )?;

        let rows = stmt
            .query_map(
                params![location, range.start.to_string(), range.end.to_string()],
                |row| {
                    let date: String = row.get(0)?;
                    let source: String = row.get(1)?;
                    Ok((parse_date(0, &date)?, source))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut dates = BTreeMap::new();
        for (date, source) in rows {
            let source = source.parse().map_err(|e: String| {
                crate::error::Error::StoreCorruption(format!("weather_days {}: {}", date, e))
            })?;
            dates.insert(date, source);
        }
        Ok(dates)
    }

    /// Number of weather days stored for a location
    pub fn weather_count(&self, location: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM weather_days WHERE location = ?",
            params![location],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of observed weather days stored for a location
    pub fn observed_weather_count(&self, location: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM weather_days WHERE location = ? AND source = 'observed'",
            params![location],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Earliest and latest stored date for a location
    pub fn weather_span(&self, location: &str) -> Result<Option<DateRange>> {
        let conn = self.conn()?;
        let (first, last): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(date), MAX(date) FROM weather_days WHERE location = ?",
            params![location],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        match (first, last) {
            (Some(first), Some(last)) => Ok(Some(DateRange {
                start: parse_date(0, &first)?,
                end: parse_date(1, &last)?,
            })),
            _ => Ok(None),
        }
    }

    /// Mean of observed daily means, per calendar month (1-12)
    ///
    /// Months with no observed days are absent from the map.
    pub fn observed_monthly_means(&self, location: &str) -> Result<HashMap<u32, f64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT CAST(strftime('%m', date) AS INTEGER) AS month, AVG(temp_mean)
             FROM weather_days
             WHERE location = ? AND source = 'observed'
             GROUP BY month",
        )?;

        let means = stmt
            .query_map(params![location], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(means)
    }

    fn row_to_weather_day(row: &rusqlite::Row) -> rusqlite::Result<WeatherDay> {
        let date: String = row.get(1)?;
        let source: String = row.get(5)?;

        Ok(WeatherDay {
            location: row.get(0)?,
            date: parse_date(1, &date)?,
            temp_min: row.get(2)?,
            temp_max: row.get(3)?,
            temp_mean: row.get(4)?,
            source: source.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?,
        })
    }
}
