//! Whether an observation is worth saying out loud.

use serde::Deserialize;

use crate::verbalizer::number_to_words;

pub fn should_mention_precip(probability: f64, threshold: f64) -> bool {
    probability >= threshold
}

pub fn should_mention_wind(speed: f64, threshold: f64) -> bool {
    speed >= threshold
}

pub fn should_mention_gust(speed: f64, threshold: f64) -> bool {
    speed >= threshold
}

/// Onset window (minutes, inclusive) that is spoken as "in about an hour"
/// instead of an enumerated minute count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HourBand {
    pub min: i64,
    pub max: i64,
}

impl Default for HourBand {
    fn default() -> Self {
        Self { min: 55, max: 75 }
    }
}

/// Spoken onset for precipitation that is close enough to announce.
///
/// Returns `None` past the end of the hour band; the engine never
/// announces an onset that far out with this phrase.
pub fn precip_timing_phrase(minutes_until: i64, band: HourBand) -> Option<String> {
    if minutes_until < 5 {
        return Some("very soon".to_string());
    }
    if minutes_until > band.max {
        return None;
    }
    if minutes_until >= band.min {
        return Some("in about an hour".to_string());
    }
    let rounded = ((minutes_until as f64 / 5.0).round() as i64) * 5;
    Some(format!("in about {} minutes", number_to_words(rounded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_are_inclusive() {
        assert!(should_mention_precip(30.0, 30.0));
        assert!(!should_mention_precip(29.9, 30.0));
        assert!(should_mention_wind(15.0, 15.0));
        assert!(!should_mention_wind(14.0, 15.0));
        assert!(should_mention_gust(40.0, 25.0));
        assert!(!should_mention_gust(0.0, 25.0));
    }

    #[test]
    fn timing_phrases() {
        let band = HourBand::default();
        assert_eq!(precip_timing_phrase(0, band).as_deref(), Some("very soon"));
        assert_eq!(precip_timing_phrase(4, band).as_deref(), Some("very soon"));
        assert_eq!(
            precip_timing_phrase(5, band).as_deref(),
            Some("in about five minutes")
        );
        assert_eq!(
            precip_timing_phrase(12, band).as_deref(),
            Some("in about ten minutes")
        );
        assert_eq!(
            precip_timing_phrase(28, band).as_deref(),
            Some("in about thirty minutes")
        );
        assert_eq!(
            precip_timing_phrase(54, band).as_deref(),
            Some("in about fifty five minutes")
        );
        assert_eq!(
            precip_timing_phrase(55, band).as_deref(),
            Some("in about an hour")
        );
        assert_eq!(
            precip_timing_phrase(75, band).as_deref(),
            Some("in about an hour")
        );
        assert_eq!(precip_timing_phrase(76, band), None);
    }

    #[test]
    fn band_is_configurable() {
        let band = HourBand { min: 45, max: 90 };
        assert_eq!(
            precip_timing_phrase(47, band).as_deref(),
            Some("in about an hour")
        );
        assert_eq!(
            precip_timing_phrase(88, band).as_deref(),
            Some("in about an hour")
        );
        assert_eq!(
            precip_timing_phrase(40, band).as_deref(),
            Some("in about forty minutes")
        );
    }
}
