//! Ollama extraction backend
//!
//! Images go to a vision model as base64 `images`; PDFs are reduced to their
//! text layer, which is appended to the prompt. Either way the model answers
//! through `/api/generate` with JSON.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::parsing::parse_bill_response;
use super::types::{BillCandidate, DocumentRef};
use super::BillExtractor;

const EXTRACT_BILL_PROMPT: &str = r#"You are reading an electricity bill from a Brazilian utility.
Extract the fields below and answer with a single JSON object, nothing else.
Use null for any field you cannot find.

{
  "total_cost": number,          // total amount due (valor total)
  "consumption_kwh": number,     // billed consumption in kWh (consumo)
  "tariff_flag": string,         // bandeira tarifaria: Verde, Amarela, Vermelha Patamar 1, Vermelha Patamar 2
  "surcharge": number | null,    // extra charged because of the flag (adicional bandeira)
  "period_start": "YYYY-MM-DD",  // previous meter reading date (leitura anterior)
  "period_end": "YYYY-MM-DD",    // current meter reading date (leitura atual)
  "due_date": "YYYY-MM-DD",      // vencimento
  "next_reading": "YYYY-MM-DD",  // scheduled next meter reading (leitura proxima)
  "reference_month": string,     // mes de referencia, e.g. "JANEIRO/2024"
  "confidence": number           // 0 to 1, how sure you are of these values
}"#;

/// Ollama-backed extractor
#[derive(Clone)]
pub struct OllamaExtractor {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaExtractor {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "gemma3".to_string());
        Some(Self::new(&host, &model))
    }

    pub fn host(&self) -> &str {
        &self.base_url
    }
}

/// What the model gets to see of a document
#[derive(Debug, PartialEq)]
enum DocumentPayload {
    /// Base64 raster image
    Image(String),
    /// Text layer of a PDF
    Text(String),
}

impl DocumentPayload {
    fn from_document(document: &DocumentRef) -> Result<Self> {
        if document.extension().as_deref() != Some("pdf") {
            return Ok(DocumentPayload::Image(
                base64::engine::general_purpose::STANDARD.encode(&document.bytes),
            ));
        }

        let text = pdf_text(&document.bytes).map_err(|e| {
            Error::Collaborator(format!("Cannot read PDF {}: {}", document.name, e))
        })?;
        if text.trim().is_empty() {
            return Err(Error::Collaborator(format!(
                "PDF {} has no text layer; scan it to an image instead",
                document.name
            )));
        }
        Ok(DocumentPayload::Text(text))
    }
}

/// Extract the text layer of a PDF
///
/// pdf-extract panics on some malformed files, so panics count as failures.
fn pdf_text(bytes: &[u8]) -> std::result::Result<String, String> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("malformed PDF".to_string()),
    }
}

/// Request to Ollama API; `images` only for vision input
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    format: &'a str,
    stream: bool,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl BillExtractor for OllamaExtractor {
    async fn extract(&self, document: &DocumentRef) -> Result<BillCandidate> {
        let (prompt, images) = match DocumentPayload::from_document(document)? {
            DocumentPayload::Image(encoded) => (EXTRACT_BILL_PROMPT.to_string(), vec![encoded]),
            DocumentPayload::Text(text) => (
                format!("{}\n\nBill text:\n{}", EXTRACT_BILL_PROMPT, text),
                Vec::new(),
            ),
        };

        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt: &prompt,
            images,
            format: "json",
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let ollama_response: OllamaResponse = response.json().await?;
        debug!(
            document = %document.name,
            "Ollama extraction response: {}",
            ollama_response.response
        );

        parse_bill_response(&ollama_response.response)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
