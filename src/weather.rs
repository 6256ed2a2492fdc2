//! Weather snapshot supplied by the host for one evaluation cycle.
//!
//! All datetimes are local wall-clock (`NaiveDateTime`); the host adapter
//! converts from whatever offset the platform reports. `hourly[0]` and
//! `daily[0]` are "now" and "today", both sequences are chronological.

use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentConditions {
    pub condition: Option<String>,
    pub temperature: Option<f64>,
    pub apparent_temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub pressure: Option<f64>,
    pub uv_index: Option<f64>,
    pub wind_speed_unit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourlyPoint {
    pub datetime: NaiveDateTime,
    pub temperature: Option<f64>,
    pub condition: Option<String>,
    pub precipitation_probability: Option<f64>,
    pub precipitation_kind: Option<String>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
}

impl HourlyPoint {
    pub fn at(datetime: NaiveDateTime) -> Self {
        Self {
            datetime,
            temperature: None,
            condition: None,
            precipitation_probability: None,
            precipitation_kind: None,
            wind_speed: None,
            wind_gust: None,
        }
    }

    /// Whole minutes from `now` until this hour starts (negative once started).
    pub fn minutes_until(&self, now: NaiveDateTime) -> i64 {
        (self.datetime - now).num_minutes()
    }

    /// Label to speak for precipitation in this hour: the precipitation
    /// kind when the forecast names one, else the hour's condition.
    pub fn precip_label(&self) -> &str {
        self.precipitation_kind
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .or(self.condition.as_deref())
            .unwrap_or("precipitation")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPoint {
    pub datetime: NaiveDateTime,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub condition: Option<String>,
    pub precipitation_probability: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WeatherSnapshot {
    pub fetched_at: Option<NaiveDateTime>,
    pub current: CurrentConditions,
    pub hourly: Vec<HourlyPoint>,
    pub daily: Vec<DailyPoint>,
}

impl WeatherSnapshot {
    pub fn today(&self) -> Option<&DailyPoint> {
        self.daily.first()
    }

    pub fn tomorrow(&self) -> Option<&DailyPoint> {
        self.daily.get(1)
    }

    pub fn current_condition(&self) -> Option<&str> {
        self.current
            .condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

const PRECIP_WORDS: [&str; 8] = [
    "rain", "snow", "sleet", "drizzle", "shower", "hail", "pouring", "lightning",
];

/// True when a condition label already describes falling precipitation.
pub fn is_precipitating(label: &str) -> bool {
    let label = label.to_lowercase();
    PRECIP_WORDS.iter().any(|w| label.contains(w))
}

/// Turn a platform condition label into something a voice can read.
///
/// `partlycloudy` → "partly cloudy", `clear-night` → "clear",
/// `lightning-rainy` → "lightning rainy".
pub fn normalize_condition(label: &str) -> String {
    let c = label.trim().to_lowercase();
    if c.is_empty() {
        return "current conditions".to_string();
    }

    let c = c
        .replace("-night", "")
        .replace("-day", "")
        .replace("_night", "")
        .replace("_day", "")
        .replace(['_', '-'], " ")
        .replace("partlycloudy", "partly cloudy")
        .replace("mostlycloudy", "mostly cloudy")
        .replace("clearsky", "clear skies");

    c.split_whitespace().collect::<Vec<_>>().join(" ")
}
