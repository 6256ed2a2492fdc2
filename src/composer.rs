//! Builds spoken announcement text from a weather snapshot.
//!
//! Pure and deterministic: the wall-clock time comes in through the
//! trigger context, never from the system clock. Missing snapshot fields
//! drop the clause that needs them instead of failing the message.

use chrono::{NaiveDateTime, Timelike};

use crate::config::Thresholds;
use crate::thresholds::{
    precip_timing_phrase, should_mention_gust, should_mention_precip, should_mention_wind,
};
use crate::triggers::{PrecipOnset, TriggerContext, TriggerKind};
use crate::verbalizer::{greeting_for, rounded_to_words, time_to_words};
use crate::weather::{normalize_condition, HourlyPoint, WeatherSnapshot};

const DEFAULT_PREFIX: &str = "here's your weather forecast";
const NO_PRECIP: &str = "No precipitation expected today.";
const CLEAR_LABELS: [&str; 3] = ["sunny", "clear", "fair"];

pub fn compose(
    snapshot: &WeatherSnapshot,
    kind: TriggerKind,
    context: &TriggerContext,
    thresholds: &Thresholds,
) -> String {
    let speech = Speech::new(snapshot, context, thresholds);
    match kind {
        TriggerKind::Scheduled | TriggerKind::Sensor | TriggerKind::Voice => speech.long_form(),
        TriggerKind::Webhook => speech.short_form(),
        TriggerKind::CurrentChange => speech.condition_alert(),
        TriggerKind::UpcomingChange => speech.precip_alert(),
    }
}

/// 19:00 through 06:59.
pub fn is_night(now: NaiveDateTime) -> bool {
    let hour = now.hour();
    hour >= 19 || hour < 7
}

struct Speech<'a> {
    snapshot: &'a WeatherSnapshot,
    context: &'a TriggerContext,
    thresholds: &'a Thresholds,
    night: bool,
}

impl<'a> Speech<'a> {
    fn new(
        snapshot: &'a WeatherSnapshot,
        context: &'a TriggerContext,
        thresholds: &'a Thresholds,
    ) -> Self {
        Self {
            snapshot,
            context,
            thresholds,
            night: is_night(context.now),
        }
    }

    fn now(&self) -> NaiveDateTime {
        self.context.now
    }

    fn greeting_with_time(&self) -> String {
        let now = self.now();
        format!(
            "{}, the time is {}",
            greeting_for(now.hour()),
            time_to_words(now.hour(), now.minute())
        )
    }

    fn name_suffix(&self) -> String {
        self.context
            .personal_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| format!(" {n}"))
            .unwrap_or_default()
    }

    fn condition(&self, label: &str) -> String {
        let normalized = normalize_condition(label);
        if self.night && CLEAR_LABELS.contains(&normalized.as_str()) {
            "Clear skies".to_string()
        } else {
            normalized
        }
    }

    fn optional_condition(&self, label: Option<&str>) -> Option<String> {
        label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| self.condition(l))
    }

    /// Speed in the snapshot's unit, else the configured one. A unit with
    /// no spoken form is left out rather than read as a symbol.
    fn speed(&self, value: f64) -> String {
        let unit = self
            .snapshot
            .current
            .wind_speed_unit
            .as_deref()
            .and_then(spoken_unit)
            .or_else(|| spoken_unit(&self.thresholds.wind_unit));
        match unit {
            Some(unit) => format!("{} {unit}", rounded_to_words(value)),
            None => rounded_to_words(value),
        }
    }

    /// Hourly entries whose hour has not ended and that start within
    /// `hours_ahead`.
    fn hours_in_scope(&self) -> impl Iterator<Item = &'a HourlyPoint> + '_ {
        let now = self.now();
        let horizon = self.thresholds.hours_ahead * 60;
        self.snapshot.hourly.iter().filter(move |h| {
            let m = h.minutes_until(now);
            m > -60 && m <= horizon
        })
    }

    fn first_precip(&self) -> Option<&'a HourlyPoint> {
        self.hours_in_scope().find(|h| {
            should_mention_precip(
                h.precipitation_probability.unwrap_or(0.0),
                self.thresholds.precip_probability,
            )
        })
    }

    fn first_wind(&self) -> Option<&'a HourlyPoint> {
        self.hours_in_scope().find(|h| {
            should_mention_wind(h.wind_speed.unwrap_or(0.0), self.thresholds.wind_speed)
                || should_mention_gust(h.wind_gust.unwrap_or(0.0), self.thresholds.wind_gust)
        })
    }

    /// Onset phrase for forecast clauses, which may look further ahead
    /// than the upcoming-precipitation alert does.
    fn onset(&self, point: &HourlyPoint) -> String {
        self.spoken_onset(point.minutes_until(self.now()).max(0), point.datetime)
    }

    /// Near onsets use the hour band; later ones "in a couple hours" up
    /// to three hours out, then the clock time.
    fn spoken_onset(&self, minutes: i64, at: NaiveDateTime) -> String {
        precip_timing_phrase(minutes, self.thresholds.hour_band).unwrap_or_else(|| {
            if minutes < 180 {
                "in a couple hours".to_string()
            } else {
                format!("around {}", time_to_words(at.hour(), at.minute()))
            }
        })
    }

    fn prefix(&self) -> String {
        self.thresholds
            .message_prefix
            .as_deref()
            .map(|p| p.trim().trim_end_matches('.').trim_end())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PREFIX)
            .to_string()
    }

    fn today_clause(&self) -> Option<String> {
        let today = self.snapshot.today()?;
        let condition = self.optional_condition(today.condition.as_deref());
        match (today.high, today.low, condition) {
            (Some(hi), Some(lo), Some(c)) => Some(format!(
                "Today expect {c} with a high of {} and a low of {}.",
                degrees(hi),
                degrees(lo)
            )),
            (Some(hi), Some(lo), None) => Some(format!(
                "Today expect a high of {} and a low of {}.",
                degrees(hi),
                degrees(lo)
            )),
            (Some(hi), None, _) => Some(format!("Today's high will be {}.", degrees(hi))),
            (None, _, Some(c)) => Some(format!("Today expect {c}.")),
            (None, _, None) => None,
        }
    }

    fn tomorrow_clause(&self) -> Option<String> {
        let tomorrow = self.snapshot.tomorrow()?;
        let hi = tomorrow.high?;
        Some(match self.optional_condition(tomorrow.condition.as_deref()) {
            Some(c) => format!("Tomorrow looks like {c} with a high near {}.", degrees(hi)),
            None => format!("Tomorrow expect a high near {}.", degrees(hi)),
        })
    }

    fn long_precip_clause(&self) -> Option<String> {
        match self.first_precip() {
            Some(point) => Some(format!(
                "Expect {} {} with a {} chance.",
                self.condition(point.precip_label()),
                self.onset(point),
                percent(point.precipitation_probability.unwrap_or(0.0))
            )),
            None if self.hours_in_scope().next().is_some() => Some(NO_PRECIP.to_string()),
            None => None,
        }
    }

    fn long_wind_clause(&self) -> Option<String> {
        let point = self.first_wind()?;
        let speed = point.wind_speed.unwrap_or(0.0);
        let gust = point.wind_gust.unwrap_or(0.0);
        if should_mention_gust(gust, self.thresholds.wind_gust) && gust > speed {
            Some(format!(
                "Watch for wind gusts up to {} {}.",
                self.speed(gust),
                self.onset(point)
            ))
        } else {
            Some(format!(
                "Winds picking up to {} {}.",
                self.speed(speed),
                self.onset(point)
            ))
        }
    }

    /// Scheduled, sensor and voice announcements.
    fn long_form(&self) -> String {
        let mut parts = vec![format!(
            "{}{}, and {}.",
            self.greeting_with_time(),
            self.name_suffix(),
            self.prefix()
        )];

        let condition = self.optional_condition(self.snapshot.current_condition());
        match (self.snapshot.current.temperature, condition) {
            (Some(t), Some(c)) => parts.push(format!("Right now it's {} with {c}.", degrees(t))),
            (Some(t), None) => parts.push(format!("Right now it's {}.", degrees(t))),
            (None, Some(c)) => parts.push(format!("Right now it's {c}.")),
            (None, None) => {}
        }

        parts.extend(self.today_clause());
        parts.extend(self.long_precip_clause());
        parts.extend(self.long_wind_clause());
        parts.extend(self.tomorrow_clause());

        parts.join(" ")
    }

    /// Webhook (wake-up alarm) announcements: today only, brief.
    fn short_form(&self) -> String {
        let mut parts = vec![format!("{}{}.", self.greeting_with_time(), self.name_suffix())];

        let condition = self.optional_condition(self.snapshot.current_condition());
        match (self.snapshot.current.temperature, condition) {
            (Some(t), Some(c)) => parts.push(format!("Currently {} and {c}.", degrees(t))),
            (Some(t), None) => parts.push(format!("Currently {}.", degrees(t))),
            (None, Some(c)) => parts.push(format!("Currently {c}.")),
            (None, None) => {}
        }

        if let Some(today) = self.snapshot.today() {
            match (today.high, today.low) {
                (Some(hi), Some(lo)) => parts.push(format!(
                    "High of {}, low of {}.",
                    degrees(hi),
                    degrees(lo)
                )),
                (Some(hi), None) => parts.push(format!("High of {} today.", degrees(hi))),
                _ => {}
            }
        }

        match self.first_precip() {
            Some(point) => parts.push(format!(
                "{} expected {}.",
                capitalize(&self.condition(point.precip_label())),
                self.onset(point)
            )),
            None if self.hours_in_scope().next().is_some() => parts.push(NO_PRECIP.to_string()),
            None => {}
        }

        if let Some(point) = self.first_wind() {
            parts.push(format!("Gusty winds {}.", self.onset(point)));
        }

        parts.join(" ")
    }

    fn condition_alert(&self) -> String {
        let label = self
            .context
            .new_condition
            .as_deref()
            .or(self.snapshot.current_condition())
            .unwrap_or("");
        let tail = match self.snapshot.current.temperature {
            Some(t) => format!(", and it's currently {}.", degrees(t)),
            None => ".".to_string(),
        };
        format!(
            "{}, weather alert. Conditions have changed to {}{tail}",
            self.greeting_with_time(),
            self.condition(label)
        )
    }

    fn precip_alert(&self) -> String {
        let onset = self.context.onset.clone().or_else(|| {
            self.first_precip().map(|point| PrecipOnset {
                label: point.precip_label().to_string(),
                minutes_until: point.minutes_until(self.now()).max(0),
                probability: point.precipitation_probability.unwrap_or(0.0),
            })
        });

        let Some(onset) = onset else {
            return format!("{}, weather alert. {NO_PRECIP}", self.greeting_with_time());
        };

        let timing = self.spoken_onset(
            onset.minutes_until,
            self.now() + chrono::Duration::minutes(onset.minutes_until),
        );
        format!(
            "{}, weather alert. {} expected {timing} with a {} chance.",
            self.greeting_with_time(),
            capitalize(&self.condition(&onset.label)),
            percent(onset.probability)
        )
    }
}

fn degrees(value: f64) -> String {
    format!("{} degrees", rounded_to_words(value))
}

fn percent(value: f64) -> String {
    format!("{} percent", rounded_to_words(value))
}

fn spoken_unit(unit: &str) -> Option<&'static str> {
    match unit.trim().to_lowercase().as_str() {
        "mph" | "mi/h" => Some("miles per hour"),
        "km/h" | "kph" | "kmh" => Some("kilometers per hour"),
        "m/s" => Some("meters per second"),
        "ft/s" => Some("feet per second"),
        "kn" | "kt" | "knots" => Some("knots"),
        "beaufort" | "bft" => Some("on the Beaufort scale"),
        _ => None,
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
