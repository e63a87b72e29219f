//! Record store: SQLite access layer with connection pooling and migrations
//!
//! This module is organized by entity:
//! - `bills` - Bill dedup-on-write and queries
//! - `weather` - WeatherDay promotion state machine and queries
//! - `ingest_runs` - Ingestion run history

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{info, warn};

use crate::error::{Error, Result};

mod bills;
mod ingest_runs;
mod weather;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "WATTWISE_DB_KEY";

/// Runs are sequential; a few connections cover nested reads
const POOL_SIZE: u32 = 4;

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted store
    const APP_SALT: &[u8; 16] = b"wattwise-salt-v1";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a stored `YYYY-MM-DD` column
///
/// Dates are written by this module only, so an unparseable value means the
/// file was altered underneath us.
pub(crate) fn parse_date(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Record store handle; clones share one connection pool
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Open an encrypted store
    ///
    /// Requires `WATTWISE_DB_KEY` to be set. Use `new_unencrypted()` for
    /// development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases.",
                DB_KEY_ENV
            ))),
        }
    }

    /// Open an unencrypted store
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Open a store with an explicit passphrase (None = unencrypted)
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let manager = match passphrase {
            Some(pass) => {
                let key_pragma = format!("PRAGMA key = 'x\"{}\"';", derive_key(pass)?);
                manager.with_init(move |conn| conn.execute_batch(&key_pragma))
            }
            None => manager,
        };
        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.check_integrity()?;
        db.run_migrations()?;

        Ok(db)
    }

    /// Store file path
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because each pooled
    /// connection would otherwise see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "wattwise_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Pooled connection
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run `PRAGMA quick_check`; anything but "ok" is fatal
    ///
    /// A wrong passphrase on an encrypted file also lands here, since
    /// SQLCipher reports it as "file is not a database".
    pub fn check_integrity(&self) -> Result<()> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("PRAGMA quick_check;")
            .map_err(|e| Error::StoreCorruption(e.to_string()))?;
        let findings = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::StoreCorruption(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::StoreCorruption(e.to_string()))?;

        if findings.len() == 1 && findings[0] == "ok" {
            return Ok(());
        }

        warn!(path = %self.db_path, findings = findings.len(), "Integrity check failed");
        Err(Error::StoreCorruption(findings.join("; ")))
    }

    /// Create tables and indexes that do not exist yet
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL: readers don't block the single writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Bills (one per billing document, keyed by content fingerprint)
            CREATE TABLE IF NOT EXISTS bills (
                identity TEXT PRIMARY KEY,
                source_name TEXT,
                period_start DATE NOT NULL,
                period_end DATE NOT NULL,
                due_date DATE,
                consumption_kwh REAL NOT NULL CHECK (consumption_kwh >= 0),
                total_cost REAL NOT NULL CHECK (total_cost >= 0),
                tariff_flag TEXT NOT NULL DEFAULT 'unknown',
                surcharge REAL,
                extraction_confidence REAL,
                ingested_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                next_reading DATE,
                reference_month TEXT,
                CHECK (period_start <= period_end)
            );

            CREATE INDEX IF NOT EXISTS idx_bills_period ON bills(period_start, period_end);

            -- Daily weather per location; source is 'observed' or 'forecast'
            CREATE TABLE IF NOT EXISTS weather_days (
                location TEXT NOT NULL,
                date DATE NOT NULL,
                temp_min REAL NOT NULL,
                temp_max REAL NOT NULL,
                temp_mean REAL NOT NULL,
                source TEXT NOT NULL CHECK (source IN ('observed', 'forecast')),
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (location, date)
            );

            CREATE INDEX IF NOT EXISTS idx_weather_source ON weather_days(location, source);

            -- Ingestion run history
            CREATE TABLE IF NOT EXISTS ingest_runs (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,                      -- bills, weather
                started_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                finished_at DATETIME,
                new_count INTEGER NOT NULL DEFAULT 0,
                skipped_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                detail TEXT                              -- JSON of the run report
            );

            CREATE INDEX IF NOT EXISTS idx_ingest_runs_kind ON ingest_runs(kind, started_at);
            "#,
        )?;

        // Stores created before these columns existed
        for (column, ddl) in [
            ("next_reading", "ALTER TABLE bills ADD COLUMN next_reading DATE"),
            ("reference_month", "ALTER TABLE bills ADD COLUMN reference_month TEXT"),
        ] {
            let present: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('bills') WHERE name = ?",
                [column],
                |row| row.get(0),
            )?;
            if !present {
                conn.execute(ddl, [])?;
                info!(column, "Added bills column");
            }
        }

        info!(path = %self.db_path, "Store schema ready");
        Ok(())
    }
}
