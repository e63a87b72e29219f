//! Pluggable bill extraction backends
//!
//! Turning a bill document into structured values is delegated to a
//! document-understanding service.
//!
//! - `BillExtractor` trait: the interface every backend implements
//! - `ExtractorClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backends: `OllamaExtractor` (vision model over HTTP), `MockExtractor`
//!
//! # Configuration
//!
//! `[extraction]` in the config file selects the backend and model;
//! `OLLAMA_HOST` / `OLLAMA_MODEL` override host and model.

mod mock;
mod ollama;
pub mod parsing;
pub mod types;

pub use mock::MockExtractor;
pub use ollama::OllamaExtractor;
pub use types::{BillCandidate, DocumentRef, RawBillExtraction};

use async_trait::async_trait;

use crate::config::{ExtractionBackend, ExtractionConfig};
use crate::error::Result;

/// Interface for document extraction backends
#[async_trait]
pub trait BillExtractor: Send + Sync {
    /// Extract a bill candidate from a document
    async fn extract(&self, document: &DocumentRef) -> Result<BillCandidate>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Model name (for logging)
    fn model(&self) -> &str;
}

/// Concrete extractor enum
#[derive(Clone)]
pub enum ExtractorClient {
    Ollama(OllamaExtractor),
    Mock(MockExtractor),
}

impl ExtractorClient {
    /// Build the configured backend
    pub fn from_config(config: &ExtractionConfig) -> Self {
        match config.backend {
            ExtractionBackend::Ollama => {
                ExtractorClient::Ollama(OllamaExtractor::new(&config.host, &config.model))
            }
            ExtractionBackend::Mock => ExtractorClient::Mock(MockExtractor::new()),
        }
    }

    /// Create an Ollama extractor from `OLLAMA_HOST` / `OLLAMA_MODEL`
    ///
    /// Returns None if `OLLAMA_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        OllamaExtractor::from_env().map(ExtractorClient::Ollama)
    }

    pub fn ollama(host: &str, model: &str) -> Self {
        ExtractorClient::Ollama(OllamaExtractor::new(host, model))
    }

    pub fn mock() -> Self {
        ExtractorClient::Mock(MockExtractor::new())
    }
}

#[async_trait]
impl BillExtractor for ExtractorClient {
    async fn extract(&self, document: &DocumentRef) -> Result<BillCandidate> {
        match self {
            ExtractorClient::Ollama(b) => b.extract(document).await,
            ExtractorClient::Mock(b) => b.extract(document).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            ExtractorClient::Ollama(b) => b.health_check().await,
            ExtractorClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            ExtractorClient::Ollama(b) => b.model(),
            ExtractorClient::Mock(b) => b.model(),
        }
    }
}
