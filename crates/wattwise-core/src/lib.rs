//! Wattwise Core Library
//!
//! Shared functionality for the Wattwise electricity bill forecaster:
//! - Database access and migrations (bills, weather days, run history)
//! - Pluggable bill extraction backends (Ollama vision model, mock)
//! - Weather providers (Open-Meteo archive and forecast, mock)
//! - Ingestion coordinators with dedup and forecast-to-observed promotion
//! - Temporal join of bills with the weather of their billing period
//! - Next-bill forecast with a confidence band

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod forecast;
pub mod ingest;
pub mod join;
pub mod models;
pub mod weather;

/// Test utilities including mock Open-Meteo and Ollama servers
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{Config, ExtractionBackend, ExtractionConfig, JoinConfig, WeatherConfig};
pub use db::Database;
pub use error::{Error, Result};
pub use extract::{
    BillCandidate, BillExtractor, DocumentRef, ExtractorClient, MockExtractor, OllamaExtractor,
};
pub use forecast::{
    ConfidenceBand, ForecastBasis, ForecastEngine, ForecastPolicy, ForecastResult,
    ForecastWarning, RateBasis,
};
pub use ingest::{
    default_range, discover_documents, BillIngestOptions, BillIngestor, WeatherIngestor,
};
pub use join::{JoinSummary, JoinedBillView, TemporalJoin};
pub use weather::{MockWeatherProvider, OpenMeteoProvider, WeatherClient, WeatherProvider};
