//! Mock weather provider for testing
//!
//! Serves days from an in-memory table and records every requested range.
//! Clones share state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};

use crate::error::{Error, Result};
use crate::models::{DateRange, Location, WeatherDay};

use super::WeatherProvider;

#[derive(Default)]
struct MockState {
    days: BTreeMap<NaiveDate, WeatherDay>,
    /// Returned on every request regardless of range
    extra: Vec<WeatherDay>,
    /// Requests touching any of these dates fail
    failing_dates: Vec<NaiveDate>,
    requests: Vec<DateRange>,
}

/// Mock weather backend
#[derive(Clone, Default)]
pub struct MockWeatherProvider {
    state: Arc<Mutex<MockState>>,
    unreachable: bool,
    delay: Option<Duration>,
    /// Requests are split after this date
    split_after: Option<NaiveDate>,
    /// Last date the provider can serve
    reach: Option<NaiveDate>,
}

impl MockWeatherProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every request fails
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Serve these days when requested
    pub fn with_days(self, days: Vec<WeatherDay>) -> Self {
        self.add_days(days);
        self
    }

    /// Always return these days, even outside the requested range
    pub fn with_extra_days(self, days: Vec<WeatherDay>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.extra.extend(days);
        }
        self
    }

    /// Fail any request whose range contains `date`
    pub fn failing_on(self, date: NaiveDate) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.failing_dates.push(date);
        }
        self
    }

    /// Sleep before answering (to exercise timeouts)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Request dates up to `date` separately from later ones
    pub fn with_split_after(mut self, date: NaiveDate) -> Self {
        self.split_after = Some(date);
        self
    }

    /// Never request dates after `date`
    pub fn with_reach(mut self, date: NaiveDate) -> Self {
        self.reach = Some(date);
        self
    }

    /// Add or replace served days after construction
    pub fn add_days(&self, days: Vec<WeatherDay>) {
        if let Ok(mut state) = self.state.lock() {
            for day in days {
                state.days.insert(day.date, day);
            }
        }
    }

    /// Ranges requested so far, in order
    pub fn requests(&self) -> Vec<DateRange> {
        self.state
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WeatherProvider for MockWeatherProvider {
    async fn fetch_daily(&self, location: &Location, range: DateRange) -> Result<Vec<WeatherDay>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Collaborator("mock weather lock poisoned".into()))?;
        state.requests.push(range);

        if self.unreachable {
            return Err(Error::Collaborator("weather provider unreachable".into()));
        }
        if state.failing_dates.iter().any(|d| range.contains(*d)) {
            return Err(Error::Collaborator(format!(
                "weather provider failed for {}",
                range
            )));
        }

        let mut days: Vec<WeatherDay> = state
            .days
            .range(range.start..=range.end)
            .map(|(_, day)| day.clone())
            .chain(state.extra.iter().cloned())
            .collect();
        for day in days.iter_mut() {
            day.location = location.name.clone();
        }
        Ok(days)
    }

    fn request_ranges(&self, range: DateRange) -> Vec<DateRange> {
        let end = self.reach.map_or(range.end, |r| range.end.min(r));
        let Ok(range) = DateRange::new(range.start, end) else {
            return Vec::new();
        };
        match self.split_after {
            Some(split) if range.contains(split) && split < range.end => vec![
                DateRange {
                    start: range.start,
                    end: split,
                },
                DateRange {
                    start: split + ChronoDuration::days(1),
                    end: range.end,
                },
            ],
            _ => vec![range],
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
