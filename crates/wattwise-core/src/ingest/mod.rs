//! Ingestion coordinators
//!
//! - `BillIngestor`: documents -> extraction -> validated bills
//! - `WeatherIngestor`: store gaps -> provider -> promoted weather days
//!
//! Both re-derive what is new from the store on every run and record the
//! run in `ingest_runs`. Collaborator calls are bounded by a timeout; a
//! failed call is reported per item and the run continues.

mod bills;
mod weather;

pub use bills::{discover_documents, BillIngestOptions, BillIngestor, SUPPORTED_EXTENSIONS};
pub use weather::{default_range, find_gaps, WeatherIngestor};

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Run a collaborator call under `limit`, mapping expiry to `Error::Timeout`
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(limit.as_secs())),
    }
}
