//! Configuration management for weather-announcer.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults so a partial file is always valid. The service re-reads the
//! file whenever its modification time changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::thresholds::HourBand;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    pub url: String,
    pub token: Option<String>,
    pub weather_entity: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".into(),
            token: None,
            weather_entity: None,
            timeout_secs: 10,
        }
    }
}

impl HomeAssistantConfig {
    /// Access token from the file, else `HASS_TOKEN`, else `SUPERVISOR_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("HASS_TOKEN").ok())
            .or_else(|| std::env::var("SUPERVISOR_TOKEN").ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_seconds: u64,
    pub weather_refresh_seconds: u64,
    pub default_tts_engine: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            weather_refresh_seconds: 300,
            default_tts_engine: None,
        }
    }
}

impl EngineConfig {
    /// Tick period, kept within one minute so no scheduled minute is
    /// stepped over.
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_seconds.clamp(1, 60))
    }
}

/// Thresholds and phrasing shared by every trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub precip_probability: f64,
    pub wind_speed: f64,
    pub wind_gust: f64,
    pub hours_ahead: i64,
    pub hourly_segments: usize,
    pub daily_days: usize,
    pub message_prefix: Option<String>,
    pub wind_unit: String,
    pub hour_band: HourBand,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            precip_probability: 30.0,
            wind_speed: 15.0,
            wind_gust: 25.0,
            hours_ahead: 24,
            hourly_segments: 12,
            daily_days: 7,
            message_prefix: None,
            wind_unit: "mph".into(),
            hour_band: HourBand::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeBasedConfig {
    pub enabled: bool,
    pub interval_hours: u32,
    pub minute_offset: u32,
    pub start_time: String,
    pub end_time: String,
    pub days_of_week: Vec<String>,
}

impl Default for TimeBasedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: 1,
            minute_offset: 0,
            start_time: "06:00".into(),
            end_time: "22:00".into(),
            days_of_week: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorBinding {
    pub entity_id: String,
    #[serde(default = "default_trigger_state")]
    pub trigger_state: String,
}

fn default_trigger_state() -> String {
    "on".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensorTriggerConfig {
    pub enabled: bool,
    pub sensors: Vec<SensorBinding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CurrentChangeConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpcomingChangeConfig {
    pub enabled: bool,
    pub minutes_before_announce: i64,
}

impl Default for UpcomingChangeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            minutes_before_announce: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookBinding {
    pub webhook_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub personal_name: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookTriggerConfig {
    pub enabled: bool,
    pub webhooks: Vec<WebhookBinding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VoiceTriggerConfig {
    pub enabled: bool,
    pub phrases: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub time_based: TimeBasedConfig,
    pub sensor: SensorTriggerConfig,
    pub current_change: CurrentChangeConfig,
    pub upcoming_change: UpcomingChangeConfig,
    pub webhook: WebhookTriggerConfig,
    pub voice: VoiceTriggerConfig,
}

/// One speech output. `tts_engine` falls back to `engine.default_tts_engine`.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioTarget {
    pub entity_id: String,
    #[serde(default)]
    pub tts_engine: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub preroll_ms: u64,
}

fn default_volume() -> f64 {
    0.6
}

impl AudioTarget {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            tts_engine: None,
            volume: default_volume(),
            cache: false,
            language: None,
            options: BTreeMap::new(),
            preroll_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    pub enabled: bool,
    pub model: String,
    pub host: String,
    pub prompt: Option<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "llama3.2:3b".into(),
            host: "http://localhost:11434".into(),
            prompt: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".into(),
            port: 8790,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl HistoryConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("weather-announcer/history")
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub home_assistant: HomeAssistantConfig,
    pub engine: EngineConfig,
    pub thresholds: Thresholds,
    pub triggers: TriggerConfig,
    pub targets: Vec<AudioTarget>,
    pub rewrite: RewriteConfig,
    pub api: ApiConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Find the config file: the explicit path, else the first existing of
    /// 1. ./config.yaml
    /// 2. ~/.config/weather-announcer/config.yaml
    /// 3. /etc/weather-announcer/config.yaml
    pub fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
        path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/weather-announcer/config.yaml")),
                Some(PathBuf::from("/etc/weather-announcer/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        })
    }

    /// Load configuration, falling back to defaults when the file is
    /// missing or broken.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(config_path) = Self::resolve_path(path) else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match Self::load_from(&config_path) {
            Ok(config) => {
                info!("Loaded config from {}", config_path.display());
                config
            }
            Err(e) => {
                warn!("{e}, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        config.clamp_volumes();
        Ok(config)
    }

    fn clamp_volumes(&mut self) {
        for target in &mut self.targets {
            if !(0.0..=1.0).contains(&target.volume) {
                warn!(
                    "Volume {} for {} outside 0.0-1.0, clamping",
                    target.volume, target.entity_id
                );
                target.volume = target.volume.clamp(0.0, 1.0);
            }
        }
    }

    /// TTS engine for a target, honoring the per-target override.
    pub fn tts_engine_for<'a>(&'a self, target: &'a AudioTarget) -> Option<&'a str> {
        target
            .tts_engine
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .or(self.engine.default_tts_engine.as_deref())
    }

    /// Configuration problems worth a warning. Affected instances are
    /// skipped at evaluation time; everything else keeps running.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();

        if self.home_assistant.weather_entity.is_none() {
            problems.push(ConfigError::invalid(
                "home_assistant.weather_entity",
                "not set, weather-dependent announcements will not fire",
            ));
        }

        if !(1..=60).contains(&self.engine.tick_seconds) {
            problems.push(ConfigError::invalid(
                "engine.tick_seconds",
                format!(
                    "{} is outside 1..=60, ticking every {}s instead",
                    self.engine.tick_seconds,
                    self.engine.tick_period().as_secs()
                ),
            ));
        }

        let band = self.thresholds.hour_band;
        if band.min < 5 {
            problems.push(ConfigError::invalid(
                "thresholds.hour_band",
                format!("min {} overlaps \"very soon\" (under 5 minutes)", band.min),
            ));
        }
        if band.min > band.max {
            problems.push(ConfigError::invalid(
                "thresholds.hour_band",
                format!("min {} is above max {}", band.min, band.max),
            ));
        }

        let time = &self.triggers.time_based;
        if time.enabled {
            if time.interval_hours == 0 || 24 % time.interval_hours != 0 {
                problems.push(ConfigError::invalid(
                    "triggers.time_based.interval_hours",
                    format!("{} does not divide 24", time.interval_hours),
                ));
            }
            if time.minute_offset > 59 {
                problems.push(ConfigError::invalid(
                    "triggers.time_based.minute_offset",
                    format!("{} is not a minute", time.minute_offset),
                ));
            }
            for (field, value) in [("start_time", &time.start_time), ("end_time", &time.end_time)] {
                if parse_clock(value).is_none() {
                    problems.push(ConfigError::invalid(
                        format!("triggers.time_based.{field}"),
                        format!("cannot parse {value:?}"),
                    ));
                }
            }
            for day in &time.days_of_week {
                if day.parse::<chrono::Weekday>().is_err() {
                    problems.push(ConfigError::invalid(
                        "triggers.time_based.days_of_week",
                        format!("unknown day {day:?}"),
                    ));
                }
            }
        }

        if self.triggers.sensor.enabled {
            for (i, s) in self.triggers.sensor.sensors.iter().enumerate() {
                if s.entity_id.trim().is_empty() {
                    problems.push(ConfigError::invalid(
                        format!("triggers.sensor.sensors[{i}]"),
                        "empty entity_id",
                    ));
                }
            }
        }

        if self.triggers.webhook.enabled {
            for (i, w) in self.triggers.webhook.webhooks.iter().enumerate() {
                if w.webhook_id.trim().is_empty() {
                    problems.push(ConfigError::invalid(
                        format!("triggers.webhook.webhooks[{i}]"),
                        "empty webhook_id",
                    ));
                }
            }
        }

        if self.targets.is_empty() {
            problems.push(ConfigError::invalid("targets", "no audio targets configured"));
        }
        for target in &self.targets {
            if self.tts_engine_for(target).is_none() {
                problems.push(ConfigError::invalid(
                    format!("targets.{}", target.entity_id),
                    "no tts_engine and no engine.default_tts_engine",
                ));
            }
        }

        problems
    }
}

/// Parse a wall-clock time written as `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(value: &str) -> Option<chrono::NaiveTime> {
    let value = value.trim();
    chrono::NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| chrono::NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

/// Tracks the config file's modification time so the service can reload
/// it when it changes.
pub struct ConfigWatcher {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: Option<PathBuf>) -> Self {
        let modified = path.as_deref().and_then(modified_time);
        Self { path, modified }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the new configuration if the file changed since last poll.
    /// A file that no longer parses keeps the previous configuration.
    pub fn poll(&mut self) -> Option<Config> {
        let path = self.path.as_deref()?;
        let modified = modified_time(path);
        if modified == self.modified {
            return None;
        }
        self.modified = modified;

        match Config::load_from(path) {
            Ok(config) => {
                info!("Config changed, reloaded {}", path.display());
                Some(config)
            }
            Err(e) => {
                warn!("Config reload failed, keeping previous config: {e}");
                None
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
