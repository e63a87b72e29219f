//! Ingestion run history

use rusqlite::params;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{IngestKind, IngestRun};

impl Database {
    /// Record the start of an ingestion run, returning its id
    pub fn start_ingest_run(&self, kind: IngestKind) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ingest_runs (kind) VALUES (?)",
            params![kind.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Stamp a run as finished with its counts and serialized report
    pub fn finish_ingest_run(
        &self,
        run_id: i64,
        new_count: i64,
        skipped_count: i64,
        failed_count: i64,
        detail: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE ingest_runs SET
                finished_at = CURRENT_TIMESTAMP,
                new_count = ?,
                skipped_count = ?,
                failed_count = ?,
                detail = ?
            WHERE id = ?
            "#,
            params![new_count, skipped_count, failed_count, detail, run_id],
        )?;
        Ok(())
    }

    /// Most recent runs first
    pub fn list_ingest_runs(&self, kind: Option<IngestKind>, limit: i64) -> Result<Vec<IngestRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, kind, started_at, finished_at, new_count, skipped_count, failed_count, detail
            FROM ingest_runs
            WHERE (?1 IS NULL OR kind = ?1)
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;

        let runs = stmt
            .query_map(params![kind.map(|k| k.as_str()), limit], |row| {
                let kind: String = row.get(1)?;
                let started_at: String = row.get(2)?;
                let finished_at: Option<String> = row.get(3)?;
                Ok(IngestRun {
                    id: row.get(0)?,
                    kind: kind.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?,
                    started_at: parse_datetime(&started_at),
                    finished_at: finished_at.map(|s| parse_datetime(&s)),
                    new_count: row.get(4)?,
                    skipped_count: row.get(5)?,
                    failed_count: row.get(6)?,
                    detail: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}
