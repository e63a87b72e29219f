//! Weather data providers
//!
//! - `WeatherProvider` trait: daily temperature summaries for a location
//! - `WeatherClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Providers: `OpenMeteoProvider`, `MockWeatherProvider`

mod mock;
mod open_meteo;

pub use mock::MockWeatherProvider;
pub use open_meteo::OpenMeteoProvider;

use async_trait::async_trait;

use crate::config::WeatherConfig;
use crate::error::Result;
use crate::models::{DateRange, Location, WeatherDay};

/// Interface for weather data sources
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Daily summaries for `range` (inclusive)
    ///
    /// Providers may return fewer days than requested; each returned day
    /// carries its own `source`.
    async fn fetch_daily(&self, location: &Location, range: DateRange) -> Result<Vec<WeatherDay>>;

    /// Split `range` into the sub-ranges fetched with one request each
    ///
    /// Dates left out cannot be served yet and are not requested.
    fn request_ranges(&self, range: DateRange) -> Vec<DateRange> {
        vec![range]
    }

    /// Provider name (for logging)
    fn name(&self) -> &str;
}

/// Concrete weather client enum
#[derive(Clone)]
pub enum WeatherClient {
    OpenMeteo(OpenMeteoProvider),
    Mock(MockWeatherProvider),
}

impl WeatherClient {
    pub fn from_config(config: &WeatherConfig) -> Self {
        WeatherClient::OpenMeteo(OpenMeteoProvider::from_config(config))
    }

    pub fn mock() -> Self {
        WeatherClient::Mock(MockWeatherProvider::new())
    }
}

#[async_trait]
impl WeatherProvider for WeatherClient {
    async fn fetch_daily(&self, location: &Location, range: DateRange) -> Result<Vec<WeatherDay>> {
        match self {
            WeatherClient::OpenMeteo(p) => p.fetch_daily(location, range).await,
            WeatherClient::Mock(p) => p.fetch_daily(location, range).await,
        }
    }

    fn request_ranges(&self, range: DateRange) -> Vec<DateRange> {
        match self {
            WeatherClient::OpenMeteo(p) => p.request_ranges(range),
            WeatherClient::Mock(p) => p.request_ranges(range),
        }
    }

    fn name(&self) -> &str {
        match self {
            WeatherClient::OpenMeteo(p) => p.name(),
            WeatherClient::Mock(p) => p.name(),
        }
    }
}
