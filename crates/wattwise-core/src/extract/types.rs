//! Types exchanged with extraction backends

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{NewBill, TariffFlag};

/// A source document handed to an extractor
#[derive(Debug, Clone)]
pub struct DocumentRef {
    /// File name, used for reporting
    pub name: String,
    pub path: Option<PathBuf>,
    pub bytes: Vec<u8>,
}

impl DocumentRef {
    /// Read a document from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            bytes,
        })
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            bytes,
        }
    }

    /// Stable identity: SHA-256 of the document bytes, hex encoded
    ///
    /// Renaming or moving a file keeps its identity; editing it does not.
    pub fn identity(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }

    /// Lowercased file extension, if any
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Raw JSON as returned by the model
///
/// Accepts the English field names asked for in the prompt and the
/// Portuguese labels printed on Light RJ bills. Numbers may arrive as
/// strings ("R$ 1.234,56"), so they are kept as JSON values until parsed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBillExtraction {
    #[serde(default, alias = "valor_total")]
    pub total_cost: Option<serde_json::Value>,
    #[serde(default, alias = "consumo_kwh")]
    pub consumption_kwh: Option<serde_json::Value>,
    #[serde(default, alias = "bandeira_tarifaria")]
    pub tariff_flag: Option<String>,
    #[serde(default, alias = "adicional_bandeira")]
    pub surcharge: Option<serde_json::Value>,
    #[serde(default, alias = "leitura_anterior")]
    pub period_start: Option<String>,
    #[serde(default, alias = "leitura_atual")]
    pub period_end: Option<String>,
    #[serde(default, alias = "vencimento")]
    pub due_date: Option<String>,
    #[serde(default, alias = "leitura_proxima")]
    pub next_reading: Option<String>,
    #[serde(default, alias = "mes_referencia")]
    pub reference_month: Option<String>,
    #[serde(default, alias = "confianca")]
    pub confidence: Option<serde_json::Value>,
}

/// Structured record proposed by an extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillCandidate {
    pub total_cost: Option<f64>,
    pub consumption_kwh: Option<f64>,
    pub tariff_flag: TariffFlag,
    pub surcharge: Option<f64>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub confidence: Option<f64>,
    pub next_reading: Option<NaiveDate>,
    pub reference_month: Option<String>,
}

/// Reading interval assumed when a bill only shows the current reading date
pub const DEFAULT_READING_DAYS: i64 = 30;

impl BillCandidate {
    /// Convert into a storable bill
    ///
    /// Missing required fields and broken invariants are `Validation` errors.
    /// A missing `period_start` is inferred as `DEFAULT_READING_DAYS` before
    /// `period_end`.
    pub fn into_new_bill(self, identity: &str, source_name: Option<&str>) -> Result<NewBill> {
        let mut missing = Vec::new();
        if self.total_cost.is_none() {
            missing.push("total_cost");
        }
        if self.consumption_kwh.is_none() {
            missing.push("consumption_kwh");
        }
        if self.period_end.is_none() {
            missing.push("period_end");
        }
        let (Some(total_cost), Some(consumption_kwh), Some(period_end)) =
            (self.total_cost, self.consumption_kwh, self.period_end)
        else {
            return Err(Error::Validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        };

        let period_start = self
            .period_start
            .unwrap_or(period_end - Duration::days(DEFAULT_READING_DAYS - 1));

        let bill = NewBill {
            identity: identity.to_string(),
            source_name: source_name.map(str::to_string),
            period_start,
            period_end,
            due_date: self.due_date,
            consumption_kwh,
            total_cost,
            tariff_flag: self.tariff_flag,
            surcharge: self.surcharge,
            extraction_confidence: self.confidence,
            // A reading date not after this period is a misread; drop it
            next_reading: self.next_reading.filter(|d| *d > period_end),
            reference_month: self.reference_month,
        };
        bill.validate()?;
        Ok(bill)
    }
}
