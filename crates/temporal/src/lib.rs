//! Temporal layer: durations, temporal patterns, action timing
//! specifications, and the Simple Temporal Network.
//!
//! Durations and patterns describe how long individual actions take and
//! where they are anchored in time; the STN composes those facts into a
//! pairwise distance-constraint graph whose consistency gates plan
//! acceptance.

pub mod duration;
pub mod pattern;
pub mod specs;
pub mod stn;

pub use duration::{parse_iso8601, render_iso8601, Duration};
pub use pattern::{PatternKind, ResolvedPattern, TemporalPattern};
pub use specs::{
    ExecutionPatternKind, PrecedenceConstraint, TemporalConstraint, TemporalSpecifications,
};
pub use stn::{
    Bound, Consistency, LodLevel, Stn, StnOptions, TimeUnit, TimedAction, MAX_ABS_BOUND,
};
