//! Home Assistant REST adapter: weather snapshots in, speech out.
//!
//! Current conditions come from the weather entity's state, forecasts from
//! the `weather.get_forecasts` service. Speech goes through
//! `media_player.volume_set` followed by `tts.speak`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{HomeAssistantConfig, Thresholds};
use crate::dispatcher::{SpeakRequest, SpeechSink};
use crate::error::{DispatchError, WeatherError};
use crate::weather::{CurrentConditions, DailyPoint, HourlyPoint, WeatherSnapshot};

/// Pull access to the host's weather data.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn snapshot(&self, thresholds: &Thresholds) -> Result<WeatherSnapshot, WeatherError>;
}

#[derive(Debug, Clone, Copy)]
enum ForecastKind {
    Hourly,
    Daily,
}

impl ForecastKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }
}

pub struct HomeAssistantClient {
    base_url: String,
    token: Option<String>,
    weather_entity: Option<String>,
    client: Client,
}

impl HomeAssistantClient {
    pub fn new(config: &HomeAssistantConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout: {e}");
                Client::new()
            });

        let token = config.resolved_token();
        if token.is_none() {
            warn!("No Home Assistant token configured (HASS_TOKEN / SUPERVISOR_TOKEN unset)");
        }

        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token,
            weather_entity: config.weather_entity.clone(),
            client,
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn entity_state(&self, entity_id: &str) -> Result<Value, WeatherError> {
        let url = format!("{}/api/states/{entity_id}", self.base_url);
        let resp = self.authorized(self.client.get(&url)).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(WeatherError::EntityNotFound(entity_id.to_string()));
        }
        if !status.is_success() {
            return Err(WeatherError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| WeatherError::Malformed(e.to_string()))
    }

    async fn forecast(
        &self,
        entity_id: &str,
        kind: ForecastKind,
    ) -> Result<Vec<Value>, WeatherError> {
        let url = format!(
            "{}/api/services/weather/get_forecasts?return_response",
            self.base_url
        );
        let body = json!({ "entity_id": entity_id, "type": kind.as_str() });
        let resp = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(WeatherError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| WeatherError::Malformed(e.to_string()))?;
        service_forecast(&data, entity_id).ok_or_else(|| {
            WeatherError::Malformed(format!("no {} forecast for {entity_id}", kind.as_str()))
        })
    }

    async fn post_service(&self, domain: &str, service: &str, body: &Value) -> Result<(), DispatchError> {
        let url = format!("{}/api/services/{domain}/{service}", self.base_url);
        let resp = self
            .authorized(self.client.post(&url))
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::Rejected {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl WeatherSource for HomeAssistantClient {
    async fn snapshot(&self, thresholds: &Thresholds) -> Result<WeatherSnapshot, WeatherError> {
        let entity_id = self
            .weather_entity
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or(WeatherError::NotConfigured)?;

        let state = self.entity_state(entity_id).await?;
        let now = Local::now().naive_local();

        let (hourly, daily) = match (
            self.forecast(entity_id, ForecastKind::Hourly).await,
            self.forecast(entity_id, ForecastKind::Daily).await,
        ) {
            (Ok(hourly), Ok(daily)) => (hourly, daily),
            (hourly, daily) => {
                if let Err(e) = hourly.as_ref().and(daily.as_ref()) {
                    warn!("Forecast service failed for {entity_id}: {e}, using state attributes");
                }
                let fallback = state["attributes"]["forecast"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default();
                (
                    hourly.unwrap_or_else(|_| fallback.clone()),
                    daily.unwrap_or(fallback),
                )
            }
        };

        let snapshot = WeatherSnapshot {
            fetched_at: Some(now),
            current: parse_current(&state),
            hourly: parse_hourly(&hourly, now, hourly_limit(thresholds)),
            daily: parse_daily(&daily, thresholds.daily_days.max(2)),
        };
        debug!(
            "Weather snapshot: {:?}, {} hourly, {} daily",
            snapshot.current.condition,
            snapshot.hourly.len(),
            snapshot.daily.len()
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl SpeechSink for HomeAssistantClient {
    async fn speak(&self, request: &SpeakRequest) -> Result<(), DispatchError> {
        let volume = json!({
            "entity_id": request.target,
            "volume_level": request.volume,
        });
        if let Err(e) = self
            .post_service("media_player", "volume_set", &volume)
            .await
        {
            warn!("Failed to set volume on {}: {e}", request.target);
        }

        if !request.preroll.is_zero() {
            tokio::time::sleep(request.preroll).await;
        }

        self.post_service("tts", "speak", &speak_body(request)).await
    }
}

/// Body for `tts.speak`; language and options only when set.
pub fn speak_body(request: &SpeakRequest) -> Value {
    let mut body = json!({
        "entity_id": request.tts_engine,
        "media_player_entity_id": request.target,
        "message": request.message,
        "cache": request.cache,
    });
    if let Some(language) = &request.language {
        body["language"] = json!(language);
    }
    if !request.options.is_empty() {
        body["options"] = json!(request.options);
    }
    body
}

fn hourly_limit(thresholds: &Thresholds) -> usize {
    (thresholds.hourly_segments * 2).max(24)
}

fn service_forecast(data: &Value, entity_id: &str) -> Option<Vec<Value>> {
    let response = data.get("service_response").unwrap_or(data);
    response
        .get(entity_id)?
        .get("forecast")?
        .as_array()
        .cloned()
}

/// Forecast timestamps arrive as RFC 3339 with an offset; the engine
/// works in local wall-clock time.
pub fn parse_local_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

fn number(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub fn parse_current(state: &Value) -> CurrentConditions {
    let attrs = &state["attributes"];
    let condition = text(state, "state").filter(|s| s != "unavailable" && s != "unknown");
    CurrentConditions {
        condition,
        temperature: number(attrs, "temperature"),
        apparent_temperature: number(attrs, "apparent_temperature"),
        humidity: number(attrs, "humidity"),
        wind_speed: number(attrs, "wind_speed"),
        wind_gust: number(attrs, "wind_gust_speed"),
        pressure: number(attrs, "pressure"),
        uv_index: number(attrs, "uv_index"),
        wind_speed_unit: text(attrs, "wind_speed_unit"),
    }
}

/// Hourly entries whose hour has not yet ended, capped at `limit`.
pub fn parse_hourly(items: &[Value], now: NaiveDateTime, limit: usize) -> Vec<HourlyPoint> {
    items
        .iter()
        .filter_map(|item| {
            let datetime = text(item, "datetime").and_then(|d| parse_local_datetime(&d))?;
            Some(HourlyPoint {
                temperature: number(item, "temperature"),
                condition: text(item, "condition"),
                precipitation_probability: number(item, "precipitation_probability"),
                precipitation_kind: text(item, "precipitation_type"),
                wind_speed: number(item, "wind_speed"),
                wind_gust: number(item, "wind_gust_speed").or_else(|| number(item, "wind_gust")),
                ..HourlyPoint::at(datetime)
            })
        })
        .filter(|h| h.minutes_until(now) > -60)
        .take(limit)
        .collect()
}

pub fn parse_daily(items: &[Value], limit: usize) -> Vec<DailyPoint> {
    items
        .iter()
        .filter_map(|item| {
            let datetime = text(item, "datetime").and_then(|d| parse_local_datetime(&d))?;
            Some(DailyPoint {
                datetime,
                high: number(item, "temperature"),
                low: number(item, "templow"),
                condition: text(item, "condition"),
                precipitation_probability: number(item, "precipitation_probability"),
            })
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn current_conditions_from_state() {
        let state = json!({
            "entity_id": "weather.home",
            "state": "partlycloudy",
            "attributes": {
                "temperature": 68.2,
                "humidity": 54,
                "wind_speed": "12.5",
                "wind_gust_speed": 20,
                "wind_speed_unit": "mph",
                "uv_index": null
            }
        });
        let current = parse_current(&state);
        assert_eq!(current.condition.as_deref(), Some("partlycloudy"));
        assert_eq!(current.temperature, Some(68.2));
        assert_eq!(current.humidity, Some(54.0));
        assert_eq!(current.wind_speed, Some(12.5));
        assert_eq!(current.wind_gust, Some(20.0));
        assert_eq!(current.wind_speed_unit.as_deref(), Some("mph"));
        assert_eq!(current.uv_index, None);

        let unavailable = parse_current(&json!({ "state": "unavailable", "attributes": {} }));
        assert!(unavailable.condition.is_none());
    }

    #[test]
    fn hourly_skips_finished_hours_and_caps() {
        let items: Vec<Value> = (8..20)
            .map(|h| {
                json!({
                    "datetime": format!("2026-05-02T{h:02}:00:00"),
                    "condition": "rainy",
                    "precipitation_probability": h * 5,
                    "wind_gust_speed": 10
                })
            })
            .collect();
        let hourly = parse_hourly(&items, at(10, 30), 4);
        assert_eq!(hourly.len(), 4);
        assert_eq!(hourly[0].datetime, at(10, 0));
        assert_eq!(hourly[0].precipitation_probability, Some(50.0));
        assert_eq!(hourly[0].wind_gust, Some(10.0));
        assert_eq!(hourly[3].datetime, at(13, 0));
    }

    #[test]
    fn service_response_shape() {
        let data = json!({
            "changed_states": [],
            "service_response": {
                "weather.home": { "forecast": [{ "datetime": "2026-05-02T00:00:00", "temperature": 70 }] }
            }
        });
        let forecast = service_forecast(&data, "weather.home").unwrap();
        assert_eq!(forecast.len(), 1);
        let daily = parse_daily(&forecast, 7);
        assert_eq!(daily[0].high, Some(70.0));
        assert!(service_forecast(&data, "weather.other").is_none());
    }

    #[test]
    fn rfc3339_converts_to_local() {
        let parsed = parse_local_datetime("2026-05-02T15:00:00+00:00").unwrap();
        let expected = DateTime::parse_from_rfc3339("2026-05-02T15:00:00+00:00")
            .unwrap()
            .with_timezone(&Local)
            .naive_local();
        assert_eq!(parsed, expected);
        assert_eq!(parse_local_datetime("2026-05-02T15:00:00"), Some(at(15, 0)));
        assert!(parse_local_datetime("tomorrow").is_none());
    }

    #[test]
    fn speak_body_omits_empty_fields() {
        let mut request = SpeakRequest {
            target: "media_player.kitchen".into(),
            tts_engine: "tts.piper".into(),
            message: "hello".into(),
            volume: 0.5,
            cache: false,
            language: None,
            options: BTreeMap::new(),
            preroll: Duration::ZERO,
        };
        let body = speak_body(&request);
        assert_eq!(body["entity_id"], "tts.piper");
        assert_eq!(body["media_player_entity_id"], "media_player.kitchen");
        assert!(body.get("language").is_none());
        assert!(body.get("options").is_none());

        request.language = Some("en-US".into());
        request.options.insert("voice".into(), json!("amy"));
        let body = speak_body(&request);
        assert_eq!(body["language"], "en-US");
        assert_eq!(body["options"]["voice"], "amy");
    }
}
