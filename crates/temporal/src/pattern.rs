//! Temporal anchor patterns for actions.
//!
//! An action may carry any subset of (start instant, end instant,
//! duration). Eight combinations are recognized; missing members are
//! derived where the pattern allows and validated where it is
//! over-constrained.

use chrono::{DateTime, Utc};
use common::{Error, Result, Timestamp};
use serde::{Deserialize, Serialize};

/// Tolerance when checking `start + duration == end`, in milliseconds.
const VALIDATION_TOLERANCE_MS: i64 = 1;

/// The recognized anchor combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// No anchors: instant action, schedulable at any time
    Instant,
    /// Duration only: the planner chooses the start
    Floating,
    /// End only: start unconstrained but not after the end
    DeadlineOnly,
    /// End and duration: start derived as `end - duration`
    DerivedStart,
    /// Start only: end unconstrained but not before the start
    OpenEnd,
    /// Start and duration: end derived as `start + duration`
    DerivedEnd,
    /// Start and end: duration derived as `end - start`
    FixedInterval,
    /// All three supplied and mutually consistent
    Validated,
}

/// Optional anchors as declared on an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalPattern {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    /// Resolved duration in seconds
    pub duration: Option<f64>,
}

/// A pattern with every derivable member filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPattern {
    pub kind: PatternKind,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub duration: Option<f64>,
}

fn seconds_to_chrono(seconds: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((seconds * 1000.0).round() as i64)
}

impl TemporalPattern {
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        duration: Option<f64>,
    ) -> Self {
        Self {
            start,
            end,
            duration,
        }
    }

    /// Classify the pattern and derive the missing members.
    ///
    /// Fails when a supplied duration is negative, when `end < start`, or
    /// when all three anchors are supplied but `start + duration != end`.
    pub fn resolve(&self) -> Result<ResolvedPattern> {
        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration < 0.0 {
                return Err(Error::Validation(format!(
                    "pattern duration must be non-negative, got {}",
                    duration
                )));
            }
        }

        let resolved = match (self.start, self.end, self.duration) {
            (None, None, None) => ResolvedPattern {
                kind: PatternKind::Instant,
                start: None,
                end: None,
                duration: Some(0.0),
            },
            (None, None, Some(duration)) => ResolvedPattern {
                kind: PatternKind::Floating,
                start: None,
                end: None,
                duration: Some(duration),
            },
            (None, Some(end), None) => ResolvedPattern {
                kind: PatternKind::DeadlineOnly,
                start: None,
                end: Some(end),
                duration: None,
            },
            (None, Some(end), Some(duration)) => ResolvedPattern {
                kind: PatternKind::DerivedStart,
                start: Some(end - seconds_to_chrono(duration)),
                end: Some(end),
                duration: Some(duration),
            },
            (Some(start), None, None) => ResolvedPattern {
                kind: PatternKind::OpenEnd,
                start: Some(start),
                end: None,
                duration: None,
            },
            (Some(start), None, Some(duration)) => ResolvedPattern {
                kind: PatternKind::DerivedEnd,
                start: Some(start),
                end: Some(start + seconds_to_chrono(duration)),
                duration: Some(duration),
            },
            (Some(start), Some(end), None) => {
                let span = end.signed_duration_since(start);
                if span < chrono::Duration::zero() {
                    return Err(Error::Validation(format!(
                        "interval end {} precedes start {}",
                        end, start
                    )));
                }
                ResolvedPattern {
                    kind: PatternKind::FixedInterval,
                    start: Some(start),
                    end: Some(end),
                    duration: Some(span.num_milliseconds() as f64 / 1000.0),
                }
            }
            (Some(start), Some(end), Some(duration)) => {
                let implied = start + seconds_to_chrono(duration);
                let drift = (implied - end).num_milliseconds().abs();
                if drift > VALIDATION_TOLERANCE_MS {
                    return Err(Error::Validation(format!(
                        "ill-formed pattern: start {} + duration {}s does not equal end {}",
                        start, duration, end
                    )));
                }
                ResolvedPattern {
                    kind: PatternKind::Validated,
                    start: Some(start),
                    end: Some(end),
                    duration: Some(duration),
                }
            }
        };

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 22, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_instant_and_floating() {
        let instant = TemporalPattern::default().resolve().unwrap();
        assert_eq!(instant.kind, PatternKind::Instant);
        assert_eq!(instant.duration, Some(0.0));

        let floating = TemporalPattern::new(None, None, Some(120.0))
            .resolve()
            .unwrap();
        assert_eq!(floating.kind, PatternKind::Floating);
        assert_eq!(floating.start, None);
    }

    #[test]
    fn test_derived_end() {
        let resolved = TemporalPattern::new(Some(at(10)), None, Some(7200.0))
            .resolve()
            .unwrap();
        assert_eq!(resolved.kind, PatternKind::DerivedEnd);
        assert_eq!(resolved.end, Some(at(12)));
    }

    #[test]
    fn test_derived_start() {
        let resolved = TemporalPattern::new(None, Some(at(12)), Some(7200.0))
            .resolve()
            .unwrap();
        assert_eq!(resolved.kind, PatternKind::DerivedStart);
        assert_eq!(resolved.start, Some(at(10)));
    }

    #[test]
    fn test_fixed_interval_derives_duration() {
        let resolved = TemporalPattern::new(Some(at(10)), Some(at(12)), None)
            .resolve()
            .unwrap();
        assert_eq!(resolved.kind, PatternKind::FixedInterval);
        assert_eq!(resolved.duration, Some(7200.0));

        assert!(TemporalPattern::new(Some(at(12)), Some(at(10)), None)
            .resolve()
            .is_err());
    }

    #[test]
    fn test_validated_pattern() {
        let ok = TemporalPattern::new(Some(at(10)), Some(at(12)), Some(7200.0));
        assert_eq!(ok.resolve().unwrap().kind, PatternKind::Validated);

        let ill_formed = TemporalPattern::new(Some(at(10)), Some(at(12)), Some(3600.0));
        assert!(ill_formed.resolve().is_err());
    }

    #[test]
    fn test_deadline_and_open_end() {
        let deadline = TemporalPattern::new(None, Some(at(12)), None)
            .resolve()
            .unwrap();
        assert_eq!(deadline.kind, PatternKind::DeadlineOnly);

        let open = TemporalPattern::new(Some(at(10)), None, None)
            .resolve()
            .unwrap();
        assert_eq!(open.kind, PatternKind::OpenEnd);
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert!(TemporalPattern::new(None, None, Some(-5.0)).resolve().is_err());
    }
}
