//! Application configuration
//!
//! Config is loaded with a two-layer resolution:
//! 1. An override file: `$WATTWISE_CONFIG`, else `~/.local/share/wattwise/config.toml`
//! 2. Embedded defaults (compiled into the binary)
//!
//! Keys missing from an override keep their default values. `OLLAMA_HOST` and
//! `OLLAMA_MODEL` override the extraction section when set.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::forecast::ForecastPolicy;
use crate::models::Location;

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable pointing at an override config file
pub const CONFIG_ENV: &str = "WATTWISE_CONFIG";

/// Which extraction collaborator to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionBackend {
    Ollama,
    Mock,
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub backend: ExtractionBackend,
    pub host: String,
    pub model: String,
    pub timeout: Duration,
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub archive_url: String,
    pub forecast_url: String,
    pub timeout: Duration,
    /// Days behind today that the archive endpoint can serve
    pub archive_lag_days: i64,
    /// Days the forecast endpoint serves, today included
    pub max_forecast_days: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct JoinConfig {
    pub degree_day_base_c: f64,
}

/// Full application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub location: Location,
    pub extraction: ExtractionConfig,
    pub weather: WeatherConfig,
    pub join: JoinConfig,
    pub forecast: ForecastPolicy,
}

impl Config {
    /// Load from the override location (if present) or the embedded defaults,
    /// then apply environment overrides
    pub fn load() -> Result<Self> {
        let override_path = std::env::var(CONFIG_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match override_path {
            Some(path) if path.exists() => Self::from_path(&path)?,
            _ => Self::embedded()?,
        };
        config.apply_env();
        Ok(config)
    }

    /// Defaults compiled into the binary
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG, None)
    }

    /// Load an explicit file layered over the embedded defaults
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML layered over the embedded defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let base = Self::embedded()?;
        parse_config(content, Some(base))
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            if !host.trim().is_empty() {
                self.extraction.host = host;
            }
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            if !model.trim().is_empty() {
                self.extraction.model = model;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.location.name.trim().is_empty() {
            return Err(Error::Config("location.name must not be empty".into()));
        }
        if !(-90.0..=90.0).contains(&self.location.latitude) {
            return Err(Error::Config(format!(
                "location.latitude out of range: {}",
                self.location.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            return Err(Error::Config(format!(
                "location.longitude out of range: {}",
                self.location.longitude
            )));
        }
        if !(0.0..=1.0).contains(&self.extraction.confidence_threshold) {
            return Err(Error::Config(format!(
                "extraction.confidence_threshold must be within [0, 1], got {}",
                self.extraction.confidence_threshold
            )));
        }
        if self.weather.archive_lag_days < 0 {
            return Err(Error::Config("weather.archive_lag_days must be >= 0".into()));
        }
        if self.weather.max_forecast_days < 1 {
            return Err(Error::Config("weather.max_forecast_days must be >= 1".into()));
        }
        self.forecast.validate()
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("wattwise").join("config.toml"))
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    location: Option<RawLocation>,
    extraction: Option<RawExtraction>,
    weather: Option<RawWeather>,
    join: Option<RawJoin>,
    forecast: Option<RawForecast>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    backend: Option<ExtractionBackend>,
    host: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    confidence_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawWeather {
    archive_url: Option<String>,
    forecast_url: Option<String>,
    timeout_secs: Option<u64>,
    archive_lag_days: Option<i64>,
    max_forecast_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawJoin {
    degree_day_base_c: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawForecast {
    min_history: Option<usize>,
    z_score: Option<f64>,
    min_relative_sd: Option<f64>,
    deficit_weight: Option<f64>,
}

/// Parse config from TOML content, layering over `base`
///
/// Without a base every key must be present (the embedded defaults).
fn parse_config(content: &str, base: Option<Config>) -> Result<Config> {
    let raw: RawConfig = toml::from_str(content)?;

    let missing = |key: &str| Error::Config(format!("missing config key: {}", key));

    let (location, extraction, weather, join, forecast) = match base {
        Some(c) => (
            Some(c.location),
            Some(c.extraction),
            Some(c.weather),
            Some(c.join),
            Some(c.forecast),
        ),
        None => (None, None, None, None, None),
    };

    let raw_location = raw.location.unwrap_or(RawLocation {
        name: None,
        latitude: None,
        longitude: None,
        timezone: None,
    });
    let location = Location {
        name: raw_location
            .name
            .or_else(|| location.as_ref().map(|l| l.name.clone()))
            .ok_or_else(|| missing("location.name"))?,
        latitude: raw_location
            .latitude
            .or_else(|| location.as_ref().map(|l| l.latitude))
            .ok_or_else(|| missing("location.latitude"))?,
        longitude: raw_location
            .longitude
            .or_else(|| location.as_ref().map(|l| l.longitude))
            .ok_or_else(|| missing("location.longitude"))?,
        timezone: raw_location
            .timezone
            .or_else(|| location.as_ref().map(|l| l.timezone.clone()))
            .ok_or_else(|| missing("location.timezone"))?,
    };

    let raw_extraction = raw.extraction.unwrap_or(RawExtraction {
        backend: None,
        host: None,
        model: None,
        timeout_secs: None,
        confidence_threshold: None,
    });
    let extraction = ExtractionConfig {
        backend: raw_extraction
            .backend
            .or_else(|| extraction.as_ref().map(|e| e.backend))
            .ok_or_else(|| missing("extraction.backend"))?,
        host: raw_extraction
            .host
            .or_else(|| extraction.as_ref().map(|e| e.host.clone()))
            .ok_or_else(|| missing("extraction.host"))?,
        model: raw_extraction
            .model
            .or_else(|| extraction.as_ref().map(|e| e.model.clone()))
            .ok_or_else(|| missing("extraction.model"))?,
        timeout: raw_extraction
            .timeout_secs
            .map(Duration::from_secs)
            .or_else(|| extraction.as_ref().map(|e| e.timeout))
            .ok_or_else(|| missing("extraction.timeout_secs"))?,
        confidence_threshold: raw_extraction
            .confidence_threshold
            .or_else(|| extraction.as_ref().map(|e| e.confidence_threshold))
            .ok_or_else(|| missing("extraction.confidence_threshold"))?,
    };

    let raw_weather = raw.weather.unwrap_or(RawWeather {
        archive_url: None,
        forecast_url: None,
        timeout_secs: None,
        archive_lag_days: None,
        max_forecast_days: None,
    });
    let weather = WeatherConfig {
        archive_url: raw_weather
            .archive_url
            .or_else(|| weather.as_ref().map(|w| w.archive_url.clone()))
            .ok_or_else(|| missing("weather.archive_url"))?,
        forecast_url: raw_weather
            .forecast_url
            .or_else(|| weather.as_ref().map(|w| w.forecast_url.clone()))
            .ok_or_else(|| missing("weather.forecast_url"))?,
        timeout: raw_weather
            .timeout_secs
            .map(Duration::from_secs)
            .or_else(|| weather.as_ref().map(|w| w.timeout))
            .ok_or_else(|| missing("weather.timeout_secs"))?,
        archive_lag_days: raw_weather
            .archive_lag_days
            .or_else(|| weather.as_ref().map(|w| w.archive_lag_days))
            .ok_or_else(|| missing("weather.archive_lag_days"))?,
        max_forecast_days: raw_weather
            .max_forecast_days
            .or_else(|| weather.as_ref().map(|w| w.max_forecast_days))
            .ok_or_else(|| missing("weather.max_forecast_days"))?,
    };

    let join = JoinConfig {
        degree_day_base_c: raw
            .join
            .and_then(|j| j.degree_day_base_c)
            .or_else(|| join.map(|j| j.degree_day_base_c))
            .ok_or_else(|| missing("join.degree_day_base_c"))?,
    };

    let raw_forecast = raw.forecast.unwrap_or(RawForecast {
        min_history: None,
        z_score: None,
        min_relative_sd: None,
        deficit_weight: None,
    });
    let forecast = ForecastPolicy {
        min_history: raw_forecast
            .min_history
            .or_else(|| forecast.as_ref().map(|f| f.min_history))
            .ok_or_else(|| missing("forecast.min_history"))?,
        z_score: raw_forecast
            .z_score
            .or_else(|| forecast.as_ref().map(|f| f.z_score))
            .ok_or_else(|| missing("forecast.z_score"))?,
        min_relative_sd: raw_forecast
            .min_relative_sd
            .or_else(|| forecast.as_ref().map(|f| f.min_relative_sd))
            .ok_or_else(|| missing("forecast.min_relative_sd"))?,
        deficit_weight: raw_forecast
            .deficit_weight
            .or_else(|| forecast.as_ref().map(|f| f.deficit_weight))
            .ok_or_else(|| missing("forecast.deficit_weight"))?,
    };

    let config = Config {
        location,
        extraction,
        weather,
        join,
        forecast,
    };
    config.validate()?;
    Ok(config)
}
