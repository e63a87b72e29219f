//! Bill operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{parse_date, parse_datetime, Database};
use crate::error::Result;
use crate::models::{Bill, NewBill, PutBillOutcome};

const BILL_COLUMNS: &str = "identity, source_name, period_start, period_end, due_date,
     consumption_kwh, total_cost, tariff_flag, surcharge, extraction_confidence, ingested_at,
     next_reading, reference_month";

impl Database {
    /// Write a bill, deduplicating on identity
    ///
    /// An existing identity is left untouched unless `replace` is set, in which
    /// case every field is overwritten and `ingested_at` is re-stamped.
    pub fn put_bill(&self, bill: &NewBill, replace: bool) -> Result<PutBillOutcome> {
        bill.validate()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM bills WHERE identity = ?",
                params![bill.identity],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        let outcome = match (exists, replace) {
            (true, false) => PutBillOutcome::SkippedDuplicate,
            (true, true) => {
                tx.execute(
                    "UPDATE bills SET source_name = ?, period_start = ?, period_end = ?,
                     due_date = ?, consumption_kwh = ?, total_cost = ?, tariff_flag = ?,
                     surcharge = ?, extraction_confidence = ?, next_reading = ?,
                     reference_month = ?, ingested_at = CURRENT_TIMESTAMP
                     WHERE identity = ?",
                    params![
                        bill.source_name,
                        bill.period_start.to_string(),
                        bill.period_end.to_string(),
                        bill.due_date.map(|d| d.to_string()),
                        bill.consumption_kwh,
                        bill.total_cost,
                        bill.tariff_flag.as_str(),
                        bill.surcharge,
                        bill.extraction_confidence,
                        bill.next_reading.map(|d| d.to_string()),
                        bill.reference_month,
                        bill.identity,
                    ],
                )?;
                PutBillOutcome::Replaced
            }
            (false, _) => {
                tx.execute(
                    "INSERT INTO bills (identity, source_name, period_start, period_end, due_date,
                     consumption_kwh, total_cost, tariff_flag, surcharge, extraction_confidence,
                     next_reading, reference_month)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        bill.identity,
                        bill.source_name,
                        bill.period_start.to_string(),
                        bill.period_end.to_string(),
                        bill.due_date.map(|d| d.to_string()),
                        bill.consumption_kwh,
                        bill.total_cost,
                        bill.tariff_flag.as_str(),
                        bill.surcharge,
                        bill.extraction_confidence,
                        bill.next_reading.map(|d| d.to_string()),
                        bill.reference_month,
                    ],
                )?;
                PutBillOutcome::Inserted
            }
        };

        tx.commit()?;
        debug!(identity = %bill.identity, outcome = ?outcome, "put_bill");
        Ok(outcome)
    }

    /// Whether a bill with this identity is stored
    pub fn bill_exists(&self, identity: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM bills WHERE identity = ?",
                params![identity],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Get a bill by identity
    pub fn get_bill(&self, identity: &str) -> Result<Option<Bill>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM bills WHERE identity = ?", BILL_COLUMNS);
        let bill = conn
            .query_row(&sql, params![identity], Self::row_to_bill)
            .optional()?;
        Ok(bill)
    }

    /// All bills ordered by period start
    pub fn list_bills(&self) -> Result<Vec<Bill>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM bills ORDER BY period_start ASC, identity ASC",
            BILL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let bills = stmt
            .query_map([], Self::row_to_bill)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(bills)
    }

    /// Bills whose period is exactly `start..=end`
    pub fn find_bills_by_period(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bill>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM bills WHERE period_start = ? AND period_end = ? ORDER BY identity",
            BILL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let bills = stmt
            .query_map(
                params![start.to_string(), end.to_string()],
                Self::row_to_bill,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(bills)
    }

    /// Number of stored bills
    pub fn bill_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM bills", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Earliest stored period start, if any bill exists
    pub fn earliest_bill_start(&self) -> Result<Option<NaiveDate>> {
        let conn = self.conn()?;
        let start: Option<String> =
            conn.query_row("SELECT MIN(period_start) FROM bills", [], |row| row.get(0))?;
        start.map(|s| parse_date(0, &s)).transpose().map_err(Into::into)
    }

    fn row_to_bill(row: &rusqlite::Row) -> rusqlite::Result<Bill> {
        let period_start: String = row.get(2)?;
        let period_end: String = row.get(3)?;
        let due_date: Option<String> = row.get(4)?;
        let tariff_flag: String = row.get(7)?;
        let ingested_at: String = row.get(10)?;
        let next_reading: Option<String> = row.get(11)?;

        Ok(Bill {
            identity: row.get(0)?,
            source_name: row.get(1)?,
            period_start: parse_date(2, &period_start)?,
            period_end: parse_date(3, &period_end)?,
            due_date: due_date.map(|s| parse_date(4, &s)).transpose()?,
            consumption_kwh: row.get(5)?,
            total_cost: row.get(6)?,
            tariff_flag: tariff_flag.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into())
            })?,
            surcharge: row.get(8)?,
            extraction_confidence: row.get(9)?,
            next_reading: next_reading.map(|s| parse_date(11, &s)).transpose()?,
            reference_month: row.get(12)?,
            ingested_at: parse_datetime(&ingested_at),
        })
    }
}
