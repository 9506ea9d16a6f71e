//! Action durations and ISO-8601 parsing.
//!
//! Durations are canonicalized to seconds internally. Variable durations
//! resolve to their midpoint (a deterministic choice), conditional
//! durations to the first case whose condition the state satisfies, and
//! resource-dependent durations divide their base by the assigned
//! resource's efficiency.

use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use state::State;
use std::collections::BTreeMap;

/// Fallback seconds when no conditional case matches.
const DEFAULT_CONDITIONAL_SECONDS: f64 = 1.0;

/// An action duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Duration {
    /// Exactly `seconds` long
    Fixed { seconds: f64 },
    /// Anywhere between `min` and `max` seconds
    Variable { min: f64, max: f64 },
    /// The first case whose condition the state satisfies wins; cases are
    /// tried in declared order
    Conditional { cases: Vec<(String, Duration)> },
    /// `base` seconds divided by the assigned resource's efficiency
    ResourceDependent {
        base: f64,
        resource_type: String,
        efficiency: BTreeMap<String, f64>,
    },
}

impl Duration {
    pub fn fixed(seconds: f64) -> Self {
        Duration::Fixed { seconds }
    }

    pub fn variable(min: f64, max: f64) -> Self {
        Duration::Variable { min, max }
    }

    /// Structural validation; nested conditional durations are checked
    /// recursively.
    pub fn validate(&self) -> Result<()> {
        match self {
            Duration::Fixed { seconds } => {
                if !seconds.is_finite() || *seconds < 0.0 {
                    return Err(Error::Validation(format!(
                        "fixed duration must be a non-negative finite number, got {}",
                        seconds
                    )));
                }
            }
            Duration::Variable { min, max } => {
                if !min.is_finite() || !max.is_finite() || *min < 0.0 || min > max {
                    return Err(Error::Validation(format!(
                        "variable duration requires 0 <= min <= max, got ({}, {})",
                        min, max
                    )));
                }
            }
            Duration::Conditional { cases } => {
                if cases.is_empty() {
                    return Err(Error::Validation(
                        "conditional duration requires at least one case".to_string(),
                    ));
                }
                for (_, duration) in cases {
                    duration.validate()?;
                }
            }
            Duration::ResourceDependent {
                base, efficiency, ..
            } => {
                if !base.is_finite() || *base < 0.0 {
                    return Err(Error::Validation(format!(
                        "resource-dependent base must be non-negative, got {}",
                        base
                    )));
                }
                for (quality, factor) in efficiency {
                    if !factor.is_finite() || *factor <= 0.0 {
                        return Err(Error::Validation(format!(
                            "efficiency for quality '{}' must be positive, got {}",
                            quality, factor
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve to concrete seconds given the current state and resource
    /// assignment (`resource_type -> quality`).
    pub fn calculate(&self, state: &State, resources: &BTreeMap<String, String>) -> f64 {
        match self {
            Duration::Fixed { seconds } => *seconds,
            Duration::Variable { min, max } => (min + max) / 2.0,
            Duration::Conditional { cases } => cases
                .iter()
                .find(|(condition, _)| condition_satisfied(state, condition))
                .map(|(_, duration)| duration.calculate(state, resources))
                .unwrap_or(DEFAULT_CONDITIONAL_SECONDS),
            Duration::ResourceDependent {
                base,
                resource_type,
                efficiency,
            } => {
                let factor = resources
                    .get(resource_type)
                    .and_then(|quality| efficiency.get(quality))
                    .copied()
                    .unwrap_or(1.0);
                base / factor
            }
        }
    }
}

/// Condition keys take the form `predicate:subject:value` (fact equality)
/// or `predicate:subject` (fact presence). Values parse as JSON where
/// possible and fall back to bare strings.
fn condition_satisfied(state: &State, condition: &str) -> bool {
    let parts: Vec<&str> = condition.splitn(3, ':').collect();
    match parts.as_slice() {
        [predicate, subject, value] => {
            let parsed = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
            state.matches(predicate, subject, &parsed)
        }
        [predicate, subject] => state.get_fact(predicate, subject).is_some(),
        _ => false,
    }
}

static ISO8601_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?$").expect("valid regex")
});

/// Parse an ISO-8601 time duration of the `PT#H#M#S` family (any subset
/// of hours, minutes, seconds). Empty or malformed strings are errors.
pub fn parse_iso8601(input: &str) -> Result<Duration> {
    let captures = ISO8601_TIME
        .captures(input)
        .ok_or_else(|| Error::Validation(format!("malformed ISO-8601 duration: '{}'", input)))?;

    let hours = captures.get(1).map(|m| m.as_str().parse::<f64>());
    let minutes = captures.get(2).map(|m| m.as_str().parse::<f64>());
    let seconds = captures.get(3).map(|m| m.as_str().parse::<f64>());

    if hours.is_none() && minutes.is_none() && seconds.is_none() {
        return Err(Error::Validation(format!(
            "ISO-8601 duration must contain at least one component: '{}'",
            input
        )));
    }

    let mut total = 0.0;
    if let Some(h) = hours {
        total += 3600.0 * h.map_err(|e| Error::Validation(e.to_string()))?;
    }
    if let Some(m) = minutes {
        total += 60.0 * m.map_err(|e| Error::Validation(e.to_string()))?;
    }
    if let Some(s) = seconds {
        total += s.map_err(|e| Error::Validation(e.to_string()))?;
    }

    Ok(Duration::Fixed { seconds: total })
}

/// Render seconds in canonical `PT#H#M#S` form, omitting zero components.
/// Zero renders as `PT0S`. Canonical inputs round-trip through
/// [`parse_iso8601`].
pub fn render_iso8601(total_seconds: f64) -> String {
    let whole = total_seconds.max(0.0);
    let hours = (whole / 3600.0).floor() as u64;
    let minutes = ((whole % 3600.0) / 60.0).floor() as u64;
    let seconds = whole % 60.0;

    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{}H", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}M", minutes));
    }
    if seconds > 0.0 || (hours == 0 && minutes == 0) {
        if seconds.fract() == 0.0 {
            out.push_str(&format!("{}S", seconds as u64));
        } else {
            out.push_str(&format!("{}S", seconds));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_parse_iso8601_known_values() {
        for (input, expected) in [
            ("PT2H", 7200.0),
            ("PT30M", 1800.0),
            ("PT2H30M", 9000.0),
            ("PT45S", 45.0),
            ("PT1H1M1S", 3661.0),
        ] {
            let parsed = parse_iso8601(input).unwrap();
            assert_eq!(parsed, Duration::Fixed { seconds: expected }, "{}", input);
        }
    }

    #[test]
    fn test_parse_iso8601_rejects_malformed() {
        for input in ["", "PT", "2H", "P2H", "PT2X", "PT2H30", "pt2h"] {
            assert!(parse_iso8601(input).is_err(), "accepted '{}'", input);
        }
    }

    #[test]
    fn test_render_iso8601() {
        assert_eq!(render_iso8601(7200.0), "PT2H");
        assert_eq!(render_iso8601(1800.0), "PT30M");
        assert_eq!(render_iso8601(9000.0), "PT2H30M");
        assert_eq!(render_iso8601(45.0), "PT45S");
        assert_eq!(render_iso8601(0.0), "PT0S");
    }

    #[test]
    fn test_fixed_and_variable_resolution() {
        let state = State::new();
        let resources = BTreeMap::new();

        assert_eq!(
            Duration::fixed(42.0).calculate(&state, &resources),
            42.0
        );
        let variable = Duration::variable(10.0, 30.0);
        let resolved = variable.calculate(&state, &resources);
        assert!((10.0..=30.0).contains(&resolved));
        assert_eq!(resolved, 20.0);
    }

    #[test]
    fn test_conditional_resolution() {
        let mut state = State::new();
        state.set_fact("weather", "kitchen", json!("hot"));
        let resources = BTreeMap::new();

        let duration = Duration::Conditional {
            cases: vec![
                ("weather:kitchen:cold".to_string(), Duration::fixed(100.0)),
                ("weather:kitchen:hot".to_string(), Duration::fixed(50.0)),
            ],
        };
        assert_eq!(duration.calculate(&state, &resources), 50.0);

        // No case matches: fall back to the default constant.
        let unmatched = Duration::Conditional {
            cases: vec![("weather:kitchen:cold".to_string(), Duration::fixed(100.0))],
        };
        assert_eq!(unmatched.calculate(&state, &resources), 1.0);
    }

    #[test]
    fn test_conditional_presence_condition() {
        let mut state = State::new();
        state.set_fact("oven_ready", "oven", json!(true));
        let resources = BTreeMap::new();

        let duration = Duration::Conditional {
            cases: vec![("oven_ready:oven".to_string(), Duration::fixed(7.0))],
        };
        assert_eq!(duration.calculate(&state, &resources), 7.0);
    }

    #[test]
    fn test_resource_dependent_resolution() {
        let state = State::new();
        let duration = Duration::ResourceDependent {
            base: 100.0,
            resource_type: "chef".to_string(),
            efficiency: BTreeMap::from([
                ("expert".to_string(), 2.0),
                ("novice".to_string(), 0.5),
            ]),
        };

        let expert = BTreeMap::from([("chef".to_string(), "expert".to_string())]);
        assert_eq!(duration.calculate(&state, &expert), 50.0);

        let novice = BTreeMap::from([("chef".to_string(), "novice".to_string())]);
        assert_eq!(duration.calculate(&state, &novice), 200.0);

        // Unknown quality falls back to the base duration.
        let unknown = BTreeMap::from([("chef".to_string(), "robot".to_string())]);
        assert_eq!(duration.calculate(&state, &unknown), 100.0);
    }

    #[test]
    fn test_validate() {
        assert!(Duration::fixed(10.0).validate().is_ok());
        assert!(Duration::fixed(-1.0).validate().is_err());
        assert!(Duration::variable(5.0, 3.0).validate().is_err());
        assert!(Duration::Conditional { cases: vec![] }.validate().is_err());
        assert!(Duration::ResourceDependent {
            base: 10.0,
            resource_type: "chef".to_string(),
            efficiency: BTreeMap::from([("expert".to_string(), 0.0)]),
        }
        .validate()
        .is_err());
    }

    proptest! {
        #[test]
        fn test_iso8601_roundtrip(hours in 0u64..48, minutes in 0u64..60, seconds in 0u64..60) {
            prop_assume!(hours > 0 || minutes > 0 || seconds > 0);
            let mut canonical = String::from("PT");
            if hours > 0 { canonical.push_str(&format!("{}H", hours)); }
            if minutes > 0 { canonical.push_str(&format!("{}M", minutes)); }
            if seconds > 0 { canonical.push_str(&format!("{}S", seconds)); }

            let parsed = parse_iso8601(&canonical).unwrap();
            let Duration::Fixed { seconds: total } = parsed else {
                unreachable!("parse_iso8601 always yields a fixed duration");
            };
            prop_assert_eq!(render_iso8601(total), canonical);
        }

        #[test]
        fn test_variable_midpoint_in_bounds(min in 0.0f64..1000.0, spread in 0.0f64..1000.0) {
            let max = min + spread;
            let duration = Duration::variable(min, max);
            let resolved = duration.calculate(&State::new(), &BTreeMap::new());
            prop_assert!(resolved >= min && resolved <= max);
        }
    }
}
