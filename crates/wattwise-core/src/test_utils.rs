//! Test utilities for wattwise-core
//!
//! Mock HTTP servers standing in for Open-Meteo and Ollama, for integration
//! tests and offline development.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use base64::Engine;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Spawn `app` on a free local port
async fn serve(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    (addr, shutdown_tx)
}

// =============================================================================
// Open-Meteo
// =============================================================================

#[derive(Default)]
struct WeatherState {
    failing: AtomicBool,
    requests: AtomicUsize,
}

/// Mock Open-Meteo server
///
/// Serves `/v1/archive` and `/v1/forecast`. Temperatures are a deterministic
/// function of the date so tests can predict them: the mean is
/// `20 + day_of_month / 2` (archive) or one degree warmer (forecast), with
/// min and max four degrees either side.
pub struct MockOpenMeteoServer {
    addr: SocketAddr,
    state: Arc<WeatherState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOpenMeteoServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state = Arc::new(WeatherState::default());
        let app = Router::new()
            .route("/v1/archive", get(handle_archive))
            .route("/v1/forecast", get(handle_forecast))
            .with_state(state.clone());

        let (addr, shutdown_tx) = serve(app).await;
        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn archive_url(&self) -> String {
        format!("{}/v1/archive", self.url())
    }

    pub fn forecast_url(&self) -> String {
        format!("{}/v1/forecast", self.url())
    }

    /// Answer every following request with 503
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Requests served so far (including failed ones)
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Mean temperature the archive reports for `date`
    pub fn archive_mean(date: NaiveDate) -> f64 {
        20.0 + date.day() as f64 / 2.0
    }
}

impl Drop for MockOpenMeteoServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Deserialize)]
struct WeatherQuery {
    #[allow(dead_code)]
    latitude: f64,
    #[allow(dead_code)]
    longitude: f64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[allow(dead_code)]
    timezone: Option<String>,
}

#[derive(Debug, Serialize)]
struct WeatherResponse {
    daily: DailyResponse,
}

#[derive(Debug, Serialize)]
struct DailyResponse {
    time: Vec<String>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    temperature_2m_mean: Vec<f64>,
}

async fn handle_archive(
    State(state): State<Arc<WeatherState>>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<WeatherResponse>, StatusCode> {
    daily_response(&state, &query, 0.0)
}

async fn handle_forecast(
    State(state): State<Arc<WeatherState>>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<WeatherResponse>, StatusCode> {
    daily_response(&state, &query, 1.0)
}

fn daily_response(
    state: &WeatherState,
    query: &WeatherQuery,
    offset: f64,
) -> Result<Json<WeatherResponse>, StatusCode> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if state.failing.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let mut daily = DailyResponse {
        time: Vec::new(),
        temperature_2m_max: Vec::new(),
        temperature_2m_min: Vec::new(),
        temperature_2m_mean: Vec::new(),
    };
    let mut date = query.start_date;
    while date <= query.end_date {
        let mean = MockOpenMeteoServer::archive_mean(date) + offset;
        daily.time.push(date.to_string());
        daily.temperature_2m_max.push(mean + 4.0);
        daily.temperature_2m_min.push(mean - 4.0);
        daily.temperature_2m_mean.push(mean);
        date = date.succ_opt().unwrap();
    }

    Ok(Json(WeatherResponse { daily }))
}

// =============================================================================
// Ollama
// =============================================================================

/// Mock Ollama server for bill extraction
///
/// `/api/generate` reads the first image: if its decoded bytes are a JSON
/// object, that object is answered verbatim (the "document" is its own
/// extraction). Anything else gets a fixed January bill.
pub struct MockOllamaServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOllamaServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate));

        let (addr, shutdown_tx) = serve(app).await;
        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

const DEFAULT_BILL_RESPONSE: &str = r#"Here is the bill:
{"valor_total": "R$ 245,90", "consumo_kwh": "312", "bandeira_tarifaria": "Amarela",
 "adicional_bandeira": "5,86", "leitura_anterior": "03/01/2024", "leitura_atual": "01/02/2024",
 "leitura_proxima": "04/03/2024", "mes_referencia": "JANEIRO/2024",
 "vencimento": "15/02/2024", "confianca": 92}"#;

/// Ollama tags endpoint response (health check)
async fn handle_tags() -> Json<TagsResponse> {
    Json(TagsResponse {
        models: vec![ModelInfo {
            name: "gemma3:latest".to_string(),
            modified_at: "2024-01-01T00:00:00Z".to_string(),
            size: 3_300_000_000,
        }],
    })
}

async fn handle_generate(Json(request): Json<GenerateRequest>) -> Json<GenerateResponse> {
    let echoed = request
        .images
        .first()
        .and_then(|img| base64::engine::general_purpose::STANDARD.decode(img).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|text| serde_json::from_str::<serde_json::Value>(text).is_ok_and(|v| v.is_object()));

    Json(GenerateResponse {
        model: request.model,
        response: echoed.unwrap_or_else(|| DEFAULT_BILL_RESPONSE.to_string()),
        done: true,
    })
}

#[derive(Debug, Serialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    name: String,
    modified_at: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    #[allow(dead_code)]
    prompt: String,
    #[serde(default)]
    images: Vec<String>,
    #[allow(dead_code)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}
