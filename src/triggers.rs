//! Trigger evaluation: decides, per configured trigger instance, whether an
//! announcement fires for an incoming event.
//!
//! Every instance is evaluated independently against every event. The only
//! mutable state is a small record per instance id (last observed value,
//! last fire time) used for edge detection and debouncing; it lives in
//! [`EvaluatorState`] and nothing outside this module writes to it.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{parse_clock, Thresholds, TimeBasedConfig, TriggerConfig};
use crate::error::ConfigError;
use crate::thresholds::should_mention_precip;
use crate::weather::{is_precipitating, WeatherSnapshot};

/// Which message shape an announcement uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Sensor,
    CurrentChange,
    UpcomingChange,
    Webhook,
    Voice,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Sensor => write!(f, "sensor"),
            Self::CurrentChange => write!(f, "current_change"),
            Self::UpcomingChange => write!(f, "upcoming_change"),
            Self::Webhook => write!(f, "webhook"),
            Self::Voice => write!(f, "voice"),
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "scheduled" | "time_based" => Ok(Self::Scheduled),
            "sensor" => Ok(Self::Sensor),
            "current_change" => Ok(Self::CurrentChange),
            "upcoming_change" => Ok(Self::UpcomingChange),
            "webhook" => Ok(Self::Webhook),
            "voice" => Ok(Self::Voice),
            other => Err(format!("unknown announcement kind: {other}")),
        }
    }
}

/// Precipitation expected to start soon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecipOnset {
    pub label: String,
    pub minutes_until: i64,
    pub probability: f64,
}

/// Everything the composer needs to know about why it is speaking.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerContext {
    pub now: NaiveDateTime,
    pub personal_name: Option<String>,
    pub previous_condition: Option<String>,
    pub new_condition: Option<String>,
    pub onset: Option<PrecipOnset>,
}

impl TriggerContext {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            now,
            personal_name: None,
            previous_condition: None,
            new_condition: None,
            onset: None,
        }
    }
}

/// Inputs to the evaluator: the periodic tick plus the three host event
/// sources.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick {
        now: NaiveDateTime,
    },
    SensorChanged {
        entity_id: String,
        old_state: Option<String>,
        state: String,
        now: NaiveDateTime,
    },
    WebhookCalled {
        webhook_id: String,
        name: Option<String>,
        volume: Option<f64>,
        now: NaiveDateTime,
    },
    Utterance {
        text: String,
        now: NaiveDateTime,
    },
}

impl EngineEvent {
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Self::Tick { now }
            | Self::SensorChanged { now, .. }
            | Self::WebhookCalled { now, .. }
            | Self::Utterance { now, .. } => *now,
        }
    }
}

/// Validated time-based schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSchedule {
    pub interval_hours: u32,
    pub minute_offset: u32,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub days: Vec<Weekday>,
}

impl TimeSchedule {
    pub fn from_config(config: &TimeBasedConfig) -> Result<Self, ConfigError> {
        if config.interval_hours == 0 || 24 % config.interval_hours != 0 {
            return Err(ConfigError::invalid(
                "triggers.time_based.interval_hours",
                format!("{} does not divide 24", config.interval_hours),
            ));
        }
        if config.minute_offset > 59 {
            return Err(ConfigError::invalid(
                "triggers.time_based.minute_offset",
                format!("{} is not a minute", config.minute_offset),
            ));
        }
        let start = parse_clock(&config.start_time).ok_or_else(|| {
            ConfigError::invalid("triggers.time_based.start_time", config.start_time.clone())
        })?;
        let end = parse_clock(&config.end_time).ok_or_else(|| {
            ConfigError::invalid("triggers.time_based.end_time", config.end_time.clone())
        })?;
        let days = config
            .days_of_week
            .iter()
            .map(|d| {
                d.parse::<Weekday>().map_err(|_| {
                    ConfigError::invalid("triggers.time_based.days_of_week", d.clone())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            interval_hours: config.interval_hours,
            minute_offset: config.minute_offset,
            start,
            end,
            days,
        })
    }

    /// Minute-of-day values on which the schedule fires.
    pub fn ticks(&self) -> Vec<u32> {
        (0..24 / self.interval_hours)
            .map(|k| self.minute_offset + k * self.interval_hours * 60)
            .collect()
    }

    /// Active window is `[start, end)`, wrapping past midnight when
    /// `end < start`. Equal bounds mean the whole day.
    pub fn in_window(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        let minute_of_day = now.hour() * 60 + now.minute();
        let on_minute = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now.time());

        (self.days.is_empty() || self.days.contains(&now.weekday()))
            && self.ticks().contains(&minute_of_day)
            && self.in_window(on_minute)
    }

    /// Latest scheduled minute in `(since, now]`.
    pub fn last_due(&self, since: NaiveDateTime, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut minute = now.with_second(0)?.with_nanosecond(0)?;
        while minute > since {
            if self.is_due(minute) {
                return Some(minute);
            }
            minute -= Duration::minutes(1);
        }
        None
    }
}

/// How far back a tick looks for a scheduled minute it has not yet seen.
const SCHEDULE_CATCH_UP_MINUTES: i64 = 5;

/// The six trigger classes.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    TimeBased(TimeSchedule),
    Sensor {
        entity_id: String,
        trigger_state: String,
    },
    CurrentChange,
    UpcomingChange {
        minutes_before: i64,
    },
    Webhook {
        webhook_id: String,
        personal_name: Option<String>,
    },
    Voice {
        phrases: Vec<String>,
    },
}

/// One configured, independently evaluated trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerInstance {
    pub id: String,
    pub trigger: Trigger,
}

/// Expand the trigger configuration into instances. Misconfigured ones are
/// skipped with a warning so the rest keep working.
pub fn instances(config: &TriggerConfig) -> Vec<TriggerInstance> {
    let mut out = Vec::new();

    if config.time_based.enabled {
        match TimeSchedule::from_config(&config.time_based) {
            Ok(schedule) => out.push(TriggerInstance {
                id: "time_based".into(),
                trigger: Trigger::TimeBased(schedule),
            }),
            Err(e) => warn!("Skipping time-based trigger: {e}"),
        }
    }

    if config.sensor.enabled {
        for (i, binding) in config.sensor.sensors.iter().enumerate() {
            if binding.entity_id.trim().is_empty() {
                warn!("Skipping sensor trigger #{i}: empty entity_id");
                continue;
            }
            out.push(TriggerInstance {
                id: format!("sensor:{i}:{}", binding.entity_id),
                trigger: Trigger::Sensor {
                    entity_id: binding.entity_id.clone(),
                    trigger_state: binding.trigger_state.clone(),
                },
            });
        }
    }

    if config.current_change.enabled {
        out.push(TriggerInstance {
            id: "current_change".into(),
            trigger: Trigger::CurrentChange,
        });
    }

    if config.upcoming_change.enabled {
        out.push(TriggerInstance {
            id: "upcoming_change".into(),
            trigger: Trigger::UpcomingChange {
                minutes_before: config.upcoming_change.minutes_before_announce,
            },
        });
    }

    if config.webhook.enabled {
        for (i, binding) in config.webhook.webhooks.iter().enumerate() {
            if !binding.enabled {
                continue;
            }
            if binding.webhook_id.trim().is_empty() {
                warn!("Skipping webhook trigger #{i}: empty webhook_id");
                continue;
            }
            out.push(TriggerInstance {
                id: format!("webhook:{i}:{}", binding.webhook_id),
                trigger: Trigger::Webhook {
                    webhook_id: binding.webhook_id.clone(),
                    personal_name: binding
                        .personal_name
                        .clone()
                        .filter(|n| !n.trim().is_empty()),
                },
            });
        }
    }

    if config.voice.enabled {
        let phrases: Vec<String> = config
            .voice
            .phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if phrases.is_empty() {
            warn!("Voice trigger enabled without phrases");
        } else {
            out.push(TriggerInstance {
                id: "voice".into(),
                trigger: Trigger::Voice { phrases },
            });
        }
    }

    out
}

/// Edge-detection record for one trigger instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstanceState {
    /// Last observed sensor state or condition label.
    pub last_seen: Option<String>,
    pub last_fired: Option<NaiveDateTime>,
    /// Last tick a time-based instance looked at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluatorState {
    pub instances: HashMap<String, InstanceState>,
}

impl EvaluatorState {
    pub fn get(&self, id: &str) -> Option<&InstanceState> {
        self.instances.get(id)
    }
}

/// A positive decision: this instance wants an announcement now.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub instance_id: String,
    pub kind: TriggerKind,
    pub context: TriggerContext,
    pub volume_override: Option<f64>,
}

impl Decision {
    fn new(instance: &TriggerInstance, kind: TriggerKind, context: TriggerContext) -> Self {
        Self {
            instance_id: instance.id.clone(),
            kind,
            context,
            volume_override: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct TriggerEvaluator {
    state: EvaluatorState,
}

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &EvaluatorState {
        &self.state
    }

    /// Evaluate every instance against one event.
    pub fn evaluate(
        &mut self,
        instances: &[TriggerInstance],
        event: &EngineEvent,
        snapshot: Option<&WeatherSnapshot>,
        thresholds: &Thresholds,
    ) -> Vec<Decision> {
        let mut decisions = Vec::new();
        for instance in instances {
            let state = self.state.instances.entry(instance.id.clone()).or_default();
            if let Some(decision) = evaluate_instance(instance, event, snapshot, thresholds, state)
            {
                state.last_fired = Some(event.now());
                debug!("Trigger {} fired ({})", instance.id, decision.kind);
                decisions.push(decision);
            }
        }
        decisions
    }

    /// Drop state for instances that no longer exist after a config reload.
    pub fn prune(&mut self, instances: &[TriggerInstance]) {
        self.state
            .instances
            .retain(|id, _| instances.iter().any(|i| &i.id == id));
    }
}

fn evaluate_instance(
    instance: &TriggerInstance,
    event: &EngineEvent,
    snapshot: Option<&WeatherSnapshot>,
    thresholds: &Thresholds,
    state: &mut InstanceState,
) -> Option<Decision> {
    match (&instance.trigger, event) {
        (Trigger::TimeBased(schedule), EngineEvent::Tick { now }) => {
            time_based_fires(schedule, *now, state)
                .then(|| Decision::new(instance, TriggerKind::Scheduled, TriggerContext::at(*now)))
        }

        (
            Trigger::Sensor {
                entity_id,
                trigger_state,
            },
            EngineEvent::SensorChanged {
                entity_id: changed,
                old_state,
                state: new_state,
                now,
            },
        ) if entity_id == changed => {
            sensor_edge(trigger_state, old_state.as_deref(), new_state, state)
                .then(|| Decision::new(instance, TriggerKind::Sensor, TriggerContext::at(*now)))
        }

        (Trigger::CurrentChange, EngineEvent::Tick { now }) => {
            let label = snapshot?.current_condition()?;
            let previous = condition_transition(label, state)?;
            let context = TriggerContext {
                previous_condition: Some(previous),
                new_condition: Some(label.to_string()),
                ..TriggerContext::at(*now)
            };
            Some(Decision::new(instance, TriggerKind::CurrentChange, context))
        }

        (Trigger::UpcomingChange { minutes_before }, EngineEvent::Tick { now }) => {
            if fired_today(state, *now) {
                return None;
            }
            let onset = upcoming_onset(snapshot?, *now, *minutes_before, thresholds)?;
            let context = TriggerContext {
                onset: Some(onset),
                ..TriggerContext::at(*now)
            };
            Some(Decision::new(instance, TriggerKind::UpcomingChange, context))
        }

        (
            Trigger::Webhook {
                webhook_id,
                personal_name,
            },
            EngineEvent::WebhookCalled {
                webhook_id: called,
                name,
                volume,
                now,
            },
        ) if webhook_id == called => {
            let context = TriggerContext {
                personal_name: name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .or_else(|| personal_name.clone()),
                ..TriggerContext::at(*now)
            };
            Some(Decision {
                volume_override: *volume,
                ..Decision::new(instance, TriggerKind::Webhook, context)
            })
        }

        (Trigger::Voice { phrases }, EngineEvent::Utterance { text, now }) => {
            voice_matches(phrases, text)
                .then(|| Decision::new(instance, TriggerKind::Voice, TriggerContext::at(*now)))
        }

        _ => None,
    }
}

/// A scheduled minute passed since the previous tick (at most
/// [`SCHEDULE_CATCH_UP_MINUTES`] back) and has not fired yet.
fn time_based_fires(schedule: &TimeSchedule, now: NaiveDateTime, state: &mut InstanceState) -> bool {
    let floor = now - Duration::minutes(SCHEDULE_CATCH_UP_MINUTES);
    let since = state.last_checked.filter(|c| *c > floor).unwrap_or(floor);
    state.last_checked = Some(now);

    match schedule.last_due(since, now) {
        Some(due) => !state.last_fired.is_some_and(|last| last >= due),
        None => false,
    }
}

/// Rising edge into `trigger_state`. With no remembered state the event's
/// own `old_state` stands in; with neither, the first observation only
/// primes the record.
fn sensor_edge(
    trigger_state: &str,
    old_state: Option<&str>,
    new_state: &str,
    state: &mut InstanceState,
) -> bool {
    let previous = state.last_seen.take().or_else(|| old_state.map(str::to_string));
    state.last_seen = Some(new_state.to_string());

    match previous {
        Some(previous) => previous != trigger_state && new_state == trigger_state,
        None => false,
    }
}

/// Records `label` and returns the previous label when it differs.
fn condition_transition(label: &str, state: &mut InstanceState) -> Option<String> {
    let previous = state.last_seen.replace(label.to_string())?;
    (previous != label && !previous.is_empty()).then_some(previous)
}

fn fired_today(state: &InstanceState, now: NaiveDateTime) -> bool {
    state
        .last_fired
        .is_some_and(|last| last.date() == now.date())
}

/// First hourly entry starting within `minutes_before` (and `hours_ahead`)
/// whose precipitation probability meets the threshold. Nothing is
/// announced while it is already precipitating.
pub fn upcoming_onset(
    snapshot: &WeatherSnapshot,
    now: NaiveDateTime,
    minutes_before: i64,
    thresholds: &Thresholds,
) -> Option<PrecipOnset> {
    if snapshot.current_condition().is_some_and(is_precipitating) {
        return None;
    }

    let horizon = thresholds.hours_ahead * 60;
    snapshot
        .hourly
        .iter()
        .filter(|h| {
            let m = h.minutes_until(now);
            m >= 0 && m <= horizon && m <= minutes_before
        })
        .find(|h| {
            should_mention_precip(
                h.precipitation_probability.unwrap_or(0.0),
                thresholds.precip_probability,
            )
        })
        .map(|h| PrecipOnset {
            label: h.precip_label().to_string(),
            minutes_until: h.minutes_until(now),
            probability: h.precipitation_probability.unwrap_or(0.0),
        })
}

/// Case-insensitive exact or substring match against configured phrases.
pub fn voice_matches(phrases: &[String], utterance: &str) -> bool {
    let utterance = utterance.trim().to_lowercase();
    if utterance.is_empty() {
        return false;
    }
    phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .any(|p| utterance == p || utterance.contains(&p))
}
