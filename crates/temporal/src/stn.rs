//! Simple Temporal Network.
//!
//! An STN is a set of named time points and pairwise bounds
//! `min <= time(b) - time(a) <= max`. A missing pair denotes `(-inf, +inf)`.
//! Consistency is decided by shortest-path inference over the constraint
//! graph (Floyd-Warshall, negative-cycle detection); large networks may be
//! delegated to the external-solver bridge instead.
//!
//! Networks are ephemeral: built per plan, consulted, possibly exported to
//! the solver, and discarded. They are not serialized.

use crate::specs::PrecedenceConstraint;
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Finite bounds whose absolute value exceeds this are rejected at
/// insertion, before any external solve.
pub const MAX_ABS_BOUND: f64 = 1e9;

const DUMMY_PREFIX: &str = "__dummy_";

/// Measurement unit for all bounds in a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Seconds per unit.
    pub fn factor(&self) -> f64 {
        match self {
            TimeUnit::Microseconds => 1e-6,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => 86400.0,
        }
    }

    /// The unit with the smaller granularity.
    pub fn finer(a: TimeUnit, b: TimeUnit) -> TimeUnit {
        if a.factor() <= b.factor() {
            a
        } else {
            b
        }
    }
}

/// Level of detail; coarser levels quantize bounds more aggressively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LodLevel {
    UltraHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl LodLevel {
    pub fn resolution(&self) -> f64 {
        match self {
            LodLevel::UltraHigh => 1.0,
            LodLevel::High => 10.0,
            LodLevel::Medium => 100.0,
            LodLevel::Low => 1000.0,
            LodLevel::VeryLow => 10000.0,
        }
    }

    pub fn finer(a: LodLevel, b: LodLevel) -> LodLevel {
        if a.resolution() <= b.resolution() {
            a
        } else {
            b
        }
    }
}

/// A `(min, max)` bound on the difference of two time points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// The unconstrained bound `(-inf, +inf)`.
    pub fn free() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Exact bound `(v, v)`.
    pub fn exact(value: f64) -> Self {
        Self::new(value, value)
    }

    /// At least `value`, unbounded above.
    pub fn at_least(value: f64) -> Self {
        Self::new(value, f64::INFINITY)
    }

    /// At most `value`, unbounded below.
    pub fn at_most(value: f64) -> Self {
        Self::new(f64::NEG_INFINITY, value)
    }

    /// AND-composition: the narrower, more restrictive bound.
    pub fn intersect(&self, other: &Bound) -> Bound {
        Bound::new(self.min.max(other.min), self.max.min(other.max))
    }

    /// OR-composition: the wider, more permissive bound.
    pub fn widen(&self, other: &Bound) -> Bound {
        Bound::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Bound seen from the opposite direction.
    pub fn reversed(&self) -> Bound {
        Bound::new(-self.max, -self.min)
    }

    /// True when no assignment satisfies the bound.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

/// Consistency lattice for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    Unknown,
    Consistent,
    Inconsistent,
}

/// Construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StnOptions {
    pub time_unit: TimeUnit,
    pub lod_level: LodLevel,
    pub max_timepoints: usize,
    pub constant_work: bool,
    pub auto_rescale: bool,
}

impl Default for StnOptions {
    fn default() -> Self {
        Self {
            time_unit: TimeUnit::Seconds,
            lod_level: LodLevel::UltraHigh,
            max_timepoints: 256,
            constant_work: false,
            auto_rescale: true,
        }
    }
}

/// An action contributing `start` and `end` points to a plan network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedAction {
    pub name: String,
    /// Resolved duration in the network's time unit
    pub duration: f64,
}

impl TimedAction {
    pub fn new(name: impl Into<String>, duration: f64) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

/// Name of an action's start time point.
pub fn start_point(action: &str) -> String {
    format!("{}__start", action)
}

/// Name of an action's end time point.
pub fn end_point(action: &str) -> String {
    format!("{}__end", action)
}

/// Pairwise distance-constraint network over named time points.
#[derive(Debug, Clone)]
pub struct Stn {
    points: Vec<String>,
    index: HashMap<String, usize>,
    /// Normalized storage: key `(i, j)` always has `i <= j`
    constraints: HashMap<(usize, usize), Bound>,
    consistency: Consistency,
    time_unit: TimeUnit,
    lod_level: LodLevel,
    max_timepoints: usize,
    constant_work: bool,
    auto_rescale: bool,
    /// Unclaimed pre-allocated slots in constant-work mode
    dummy_free: Vec<usize>,
    /// Solved times lifted back from an external solve
    schedule: HashMap<String, f64>,
}

impl Stn {
    pub fn new(opts: StnOptions) -> Self {
        let mut stn = Self {
            points: Vec::new(),
            index: HashMap::new(),
            constraints: HashMap::new(),
            consistency: Consistency::Unknown,
            time_unit: opts.time_unit,
            lod_level: opts.lod_level,
            max_timepoints: opts.max_timepoints,
            constant_work: opts.constant_work,
            auto_rescale: opts.auto_rescale,
            dummy_free: Vec::new(),
            schedule: HashMap::new(),
        };

        if stn.constant_work {
            // Pre-allocate the full pool so later adds run against a
            // steady-state structure.
            for i in 0..stn.max_timepoints {
                let name = format!("{}{}", DUMMY_PREFIX, i);
                stn.index.insert(name.clone(), i);
                stn.points.push(name);
                stn.constraints.insert((i, i), Bound::new(-1.0, 1.0));
            }
            stn.dummy_free = (0..stn.max_timepoints).rev().collect();
        }

        stn
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn lod_level(&self) -> LodLevel {
        self.lod_level
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Real (non-dummy) time point names, in insertion order.
    pub fn time_points(&self) -> Vec<&str> {
        self.points
            .iter()
            .filter(|p| !p.starts_with(DUMMY_PREFIX))
            .map(String::as_str)
            .collect()
    }

    pub fn has_time_point(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Solved time for a point, when an external solve has been lifted back.
    pub fn scheduled_time(&self, name: &str) -> Option<f64> {
        self.schedule.get(name).copied()
    }

    /// Register a time point. In constant-work mode this claims a
    /// pre-allocated slot; otherwise it appends, bounded by
    /// `max_timepoints`.
    pub fn add_time_point(&mut self, name: &str) -> Result<()> {
        if self.index.contains_key(name) {
            return Ok(());
        }
        if self.constant_work {
            let slot = self.dummy_free.pop().ok_or_else(|| {
                Error::OutOfBounds(format!(
                    "time point pool of {} exhausted",
                    self.max_timepoints
                ))
            })?;
            let dummy_name = self.points[slot].clone();
            self.index.remove(&dummy_name);
            self.constraints.remove(&(slot, slot));
            self.points[slot] = name.to_string();
            self.index.insert(name.to_string(), slot);
        } else {
            if self.points.len() >= self.max_timepoints {
                return Err(Error::OutOfBounds(format!(
                    "network limited to {} time points",
                    self.max_timepoints
                )));
            }
            self.index.insert(name.to_string(), self.points.len());
            self.points.push(name.to_string());
        }
        Ok(())
    }

    /// Assert `min <= time(b) - time(a) <= max`.
    ///
    /// Re-adding an existing pair intersects with the prior bound. Fails
    /// fast on `min > max`, on finite values beyond [`MAX_ABS_BOUND`], and
    /// on self-constraints other than `(0, 0)`.
    pub fn add_constraint(&mut self, a: &str, b: &str, bound: Bound) -> Result<()> {
        if bound.min.is_nan() || bound.max.is_nan() {
            return Err(Error::InvalidInput("bound must not be NaN".to_string()));
        }
        if bound.is_empty() {
            return Err(Error::InvalidInput(format!(
                "bound has min {} > max {}",
                bound.min, bound.max
            )));
        }
        for value in [bound.min, bound.max] {
            if value.is_finite() && value.abs() > MAX_ABS_BOUND {
                return Err(Error::OutOfBounds(format!(
                    "bound {} exceeds the {} cap",
                    value, MAX_ABS_BOUND
                )));
            }
        }
        if a == b && (bound.min != 0.0 || bound.max != 0.0) {
            return Err(Error::InvalidInput(format!(
                "self-constraint on '{}' must be (0, 0)",
                a
            )));
        }

        self.add_time_point(a)?;
        self.add_time_point(b)?;
        self.insert_bound(a, b, bound);
        Ok(())
    }

    /// Normalize, intersect and store a bound. Internal composition paths
    /// use this directly; user input goes through [`Stn::add_constraint`].
    fn insert_bound(&mut self, a: &str, b: &str, bound: Bound) {
        let ia = self.index[a];
        let ib = self.index[b];
        let (key, oriented) = if ia <= ib {
            ((ia, ib), bound)
        } else {
            ((ib, ia), bound.reversed())
        };

        let merged = match self.constraints.get(&key) {
            Some(existing) => existing.intersect(&oriented),
            None => oriented,
        };
        if merged.is_empty() {
            debug!(a, b, "constraint intersection is empty");
            self.consistency = Consistency::Inconsistent;
        } else if self.consistency == Consistency::Consistent {
            self.consistency = Consistency::Unknown;
        }
        self.constraints.insert(key, merged);
    }

    /// The stored or implied-by-direction bound for `(a, b)`; `None` when
    /// either point is unknown or the pair is unconstrained.
    pub fn get_constraint(&self, a: &str, b: &str) -> Option<Bound> {
        let ia = *self.index.get(a)?;
        let ib = *self.index.get(b)?;
        if ia <= ib {
            self.constraints.get(&(ia, ib)).copied()
        } else {
            self.constraints.get(&(ib, ia)).map(|b| b.reversed())
        }
    }

    /// Decide consistency by shortest-path inference and cache the result.
    pub fn check_consistency(&mut self) -> bool {
        if self.constraints.values().any(Bound::is_empty) {
            self.consistency = Consistency::Inconsistent;
            return false;
        }

        let n = self.points.len();
        let mut dist = vec![vec![f64::INFINITY; n]; n];
        for (i, row) in dist.iter_mut().enumerate() {
            row[i] = 0.0;
        }

        for (&(i, j), bound) in &self.constraints {
            if i == j {
                if bound.min > 0.0 || bound.max < 0.0 {
                    self.consistency = Consistency::Inconsistent;
                    return false;
                }
                continue;
            }
            if bound.max.is_finite() {
                dist[i][j] = dist[i][j].min(bound.max);
            }
            if bound.min.is_finite() {
                dist[j][i] = dist[j][i].min(-bound.min);
            }
        }

        for k in 0..n {
            for i in 0..n {
                if dist[i][k].is_infinite() {
                    continue;
                }
                for j in 0..n {
                    let through = dist[i][k] + dist[k][j];
                    if through < dist[i][j] {
                        dist[i][j] = through;
                    }
                }
            }
        }

        let consistent = (0..n).all(|i| dist[i][i] >= 0.0);
        self.consistency = if consistent {
            Consistency::Consistent
        } else {
            Consistency::Inconsistent
        };
        consistent
    }

    /// Current consistency, computing it when unknown.
    pub fn is_consistent(&mut self) -> bool {
        if self.consistency == Consistency::Unknown {
            self.check_consistency();
        }
        self.consistency == Consistency::Consistent
    }

    /// All stored constraints as `(point_a, point_b, bound)` triples.
    pub fn constraint_triples(&self) -> Vec<(String, String, Bound)> {
        let mut triples: Vec<(String, String, Bound)> = self
            .constraints
            .iter()
            .map(|(&(i, j), bound)| (self.points[i].clone(), self.points[j].clone(), *bound))
            .collect();
        triples.sort_by(|a, b| (a.0.as_str(), a.1.as_str()).cmp(&(b.0.as_str(), b.1.as_str())));
        triples
    }

    /// Bring two networks to a common unit and level of detail, converting
    /// both to the finer of each when `auto_rescale` allows it.
    fn align(a: &Stn, b: &Stn) -> Result<(Stn, Stn)> {
        let mut left = a.clone();
        let mut right = b.clone();
        if left.time_unit != right.time_unit || left.lod_level != right.lod_level {
            if !(left.auto_rescale || right.auto_rescale) {
                return Err(Error::InvalidInput(format!(
                    "cannot combine networks with units {:?}/{:?} and LOD {:?}/{:?} without auto-rescale",
                    left.time_unit, right.time_unit, left.lod_level, right.lod_level
                )));
            }
            let unit = TimeUnit::finer(left.time_unit, right.time_unit);
            let lod = LodLevel::finer(left.lod_level, right.lod_level);
            left.convert_units(unit);
            right.convert_units(unit);
            left.rescale_lod(lod);
            right.rescale_lod(lod);
        }
        Ok((left, right))
    }

    /// AND-union for plan composition: time points are combined and
    /// overlapping pairs take the intersection (the narrower bound).
    ///
    /// The result is commutative in time points, constraints and
    /// consistency. The OR-flavored operator is [`Stn::union_permissive`].
    pub fn union(a: &Stn, b: &Stn) -> Result<Stn> {
        let (left, right) = Self::align(a, b)?;
        let mut result = Stn::new(StnOptions {
            time_unit: left.time_unit,
            lod_level: left.lod_level,
            max_timepoints: left.max_timepoints.saturating_add(right.max_timepoints),
            constant_work: false,
            auto_rescale: left.auto_rescale || right.auto_rescale,
        });

        for source in [&left, &right] {
            for point in source.time_points() {
                result.add_time_point(point)?;
            }
            for (pa, pb, bound) in source.constraint_triples() {
                if pa.starts_with(DUMMY_PREFIX) || pb.starts_with(DUMMY_PREFIX) {
                    continue;
                }
                result.insert_bound(&pa, &pb, bound);
            }
        }

        if left.consistency == Consistency::Inconsistent
            || right.consistency == Consistency::Inconsistent
        {
            result.consistency = Consistency::Inconsistent;
        } else if result.consistency != Consistency::Inconsistent {
            result.check_consistency();
        }
        Ok(result)
    }

    /// OR-union: overlapping pairs take the widened bound; pairs present
    /// in only one network are unconstrained in the other and therefore
    /// drop out. Not used for plan composition.
    pub fn union_permissive(a: &Stn, b: &Stn) -> Result<Stn> {
        let (left, right) = Self::align(a, b)?;
        let mut result = Stn::new(StnOptions {
            time_unit: left.time_unit,
            lod_level: left.lod_level,
            max_timepoints: left.max_timepoints.saturating_add(right.max_timepoints),
            constant_work: false,
            auto_rescale: left.auto_rescale || right.auto_rescale,
        });

        for source in [&left, &right] {
            for point in source.time_points() {
                result.add_time_point(point)?;
            }
        }
        for (pa, pb, bound) in left.constraint_triples() {
            if pa.starts_with(DUMMY_PREFIX) || pb.starts_with(DUMMY_PREFIX) {
                continue;
            }
            if let Some(other) = right.get_constraint(&pa, &pb) {
                result.insert_bound(&pa, &pb, bound.widen(&other));
            }
        }

        result.check_consistency();
        Ok(result)
    }

    /// Left-fold AND-union over a list of networks.
    pub fn chain(stns: &[Stn]) -> Result<Stn> {
        let mut iter = stns.iter();
        let Some(first) = iter.next() else {
            return Ok(Stn::new(StnOptions::default()));
        };
        let mut combined = first.clone();
        for next in iter {
            combined = Stn::union(&combined, next)?;
        }
        Ok(combined)
    }

    /// Partition real time points into `n` chunks of roughly equal size,
    /// keeping only constraints fully inside each chunk. A consistent
    /// parent yields consistent segments; otherwise segment status is
    /// unknown.
    pub fn split(&self, n: usize) -> Vec<Stn> {
        let real: Vec<&str> = self.time_points();
        let chunks = n.max(1);
        let chunk_size = real.len().div_ceil(chunks).max(1);

        let mut segments = Vec::with_capacity(chunks);
        for chunk in real.chunks(chunk_size) {
            let mut segment = Stn::new(StnOptions {
                time_unit: self.time_unit,
                lod_level: self.lod_level,
                max_timepoints: self.max_timepoints,
                constant_work: false,
                auto_rescale: self.auto_rescale,
            });
            for point in chunk {
                // Capacity cannot be exceeded: chunks never outgrow the parent.
                let _ = segment.add_time_point(point);
            }
            for (pa, pb, bound) in self.constraint_triples() {
                if segment.has_time_point(&pa) && segment.has_time_point(&pb) {
                    segment.insert_bound(&pa, &pb, bound);
                }
            }
            segment.consistency = if self.consistency == Consistency::Consistent {
                Consistency::Consistent
            } else {
                Consistency::Unknown
            };
            segments.push(segment);
        }
        segments
    }

    /// Rescale every finite bound to a new measurement unit. Infinite
    /// bounds are preserved. Feasibility, and therefore cached
    /// consistency, is unchanged.
    pub fn convert_units(&mut self, new_unit: TimeUnit) {
        if new_unit == self.time_unit {
            return;
        }
        let ratio = self.time_unit.factor() / new_unit.factor();
        for bound in self.constraints.values_mut() {
            if bound.min.is_finite() {
                bound.min *= ratio;
            }
            if bound.max.is_finite() {
                bound.max *= ratio;
            }
        }
        for time in self.schedule.values_mut() {
            *time *= ratio;
        }
        self.time_unit = new_unit;
    }

    /// Re-quantize bounds for a new level of detail, rounding outward to
    /// preserve feasibility, then merge time points whose pairwise bound
    /// collapsed to exactly `(0, 0)`.
    pub fn rescale_lod(&mut self, new_level: LodLevel) {
        if new_level == self.lod_level {
            return;
        }
        let ratio = new_level.resolution() / self.lod_level.resolution();
        for bound in self.constraints.values_mut() {
            if bound.min.is_finite() {
                bound.min = (bound.min / ratio).floor();
            }
            if bound.max.is_finite() {
                bound.max = (bound.max / ratio).ceil();
            }
        }
        for time in self.schedule.values_mut() {
            *time /= ratio;
        }
        self.lod_level = new_level;

        self.merge_collapsed_points();

        // Outward rounding can only widen, so a consistent network stays
        // consistent; anything else must be re-checked.
        if self.consistency != Consistency::Consistent {
            self.consistency = Consistency::Unknown;
        }
    }

    /// Merge every pair of distinct points constrained to `(0, 0)`,
    /// rewiring the merged point's constraints onto the survivor.
    fn merge_collapsed_points(&mut self) {
        let mut alias: HashMap<usize, usize> = HashMap::new();
        for (&(i, j), bound) in &self.constraints {
            if i != j && bound.min == 0.0 && bound.max == 0.0 {
                alias.insert(j.max(i), j.min(i));
            }
        }
        if alias.is_empty() {
            return;
        }

        let resolve = |mut idx: usize, alias: &HashMap<usize, usize>| {
            while let Some(&target) = alias.get(&idx) {
                if target == idx {
                    break;
                }
                idx = target;
            }
            idx
        };

        let old_points = std::mem::take(&mut self.points);
        let old_constraints = std::mem::take(&mut self.constraints);
        self.index.clear();

        let mut kept = Vec::with_capacity(old_points.len());
        for (idx, name) in old_points.iter().enumerate() {
            if resolve(idx, &alias) == idx {
                self.index.insert(name.clone(), kept.len());
                kept.push(name.clone());
            }
        }
        let mut remap = HashMap::new();
        for (idx, name) in old_points.iter().enumerate() {
            let surviving = &old_points[resolve(idx, &alias)];
            remap.insert(idx, self.index[surviving.as_str()]);
            if resolve(idx, &alias) != idx {
                debug!(merged = %name, into = %surviving, "merged collapsed time point");
            }
        }
        self.points = kept;

        for ((i, j), bound) in old_constraints {
            let (ni, nj) = (remap[&i], remap[&j]);
            if ni == nj {
                if bound.min > 0.0 || bound.max < 0.0 {
                    self.consistency = Consistency::Inconsistent;
                }
                continue;
            }
            let a = self.points[ni].clone();
            let b = self.points[nj].clone();
            self.insert_bound(&a, &b, bound);
        }
    }

    /// Build a network from a plan's actions and precedence constraints.
    /// Each action contributes start and end points tied by its duration.
    pub fn from_timed_actions(
        actions: &[TimedAction],
        precedence: &[PrecedenceConstraint],
        opts: StnOptions,
    ) -> Result<Stn> {
        let mut stn = Stn::new(opts);
        for action in actions {
            let start = start_point(&action.name);
            let end = end_point(&action.name);
            stn.add_time_point(&start)?;
            stn.add_time_point(&end)?;
            stn.add_constraint(&start, &end, Bound::exact(action.duration))?;
        }
        for constraint in precedence {
            match constraint {
                PrecedenceConstraint::Before { first, second } => {
                    stn.add_constraint(
                        &end_point(first),
                        &start_point(second),
                        Bound::at_least(0.0),
                    )?;
                }
                PrecedenceConstraint::SimultaneousStart { first, second } => {
                    stn.add_constraint(
                        &start_point(first),
                        &start_point(second),
                        Bound::exact(0.0),
                    )?;
                }
                // Overlap is permitted: only the start order is pinned.
                PrecedenceConstraint::OverlapAllowed { first, second }
                | PrecedenceConstraint::PipelineStage { first, second } => {
                    stn.add_constraint(
                        &start_point(first),
                        &start_point(second),
                        Bound::at_least(0.0),
                    )?;
                }
            }
        }
        Ok(stn)
    }

    /// Compose a network from a plan and report its consistency.
    pub fn validate_plan(
        actions: &[TimedAction],
        precedence: &[PrecedenceConstraint],
        opts: StnOptions,
    ) -> Result<bool> {
        let mut stn = Stn::from_timed_actions(actions, precedence, opts)?;
        Ok(stn.is_consistent())
    }

    /// Lift solved times back into the network and mark it consistent.
    pub fn apply_schedule(&mut self, times: &HashMap<String, f64>) {
        for (point, time) in times {
            if !self.has_time_point(point) {
                warn!(point = %point, "schedule references unknown time point");
                continue;
            }
            self.schedule.insert(point.clone(), *time);
        }
        self.consistency = Consistency::Consistent;
    }

    /// Mark the network's consistency explicitly (used by the solver
    /// bridge on unsatisfiable or timed-out solves).
    pub fn set_consistency(&mut self, consistency: Consistency) {
        self.consistency = consistency;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stn() -> Stn {
        Stn::new(StnOptions::default())
    }

    #[test]
    fn test_single_point_is_consistent() {
        let mut network = stn();
        network.add_time_point("a").unwrap();
        assert!(network.check_consistency());
        assert_eq!(network.consistency(), Consistency::Consistent);
    }

    #[test]
    fn test_opposing_bounds_inconsistent() {
        let mut network = stn();
        network
            .add_constraint("A", "B", Bound::new(10.0, 15.0))
            .unwrap();
        network
            .add_constraint("B", "A", Bound::new(20.0, 25.0))
            .unwrap();
        assert!(!network.is_consistent());
        assert_eq!(network.consistency(), Consistency::Inconsistent);
    }

    #[test]
    fn test_readd_intersects() {
        let mut network = stn();
        network
            .add_constraint("a", "b", Bound::new(0.0, 100.0))
            .unwrap();
        network
            .add_constraint("a", "b", Bound::new(50.0, 200.0))
            .unwrap();
        assert_eq!(
            network.get_constraint("a", "b"),
            Some(Bound::new(50.0, 100.0))
        );
        // Reverse direction reads the negated bound.
        assert_eq!(
            network.get_constraint("b", "a"),
            Some(Bound::new(-100.0, -50.0))
        );
    }

    #[test]
    fn test_empty_intersection_marks_inconsistent() {
        let mut network = stn();
        network
            .add_constraint("a", "b", Bound::new(0.0, 10.0))
            .unwrap();
        network
            .add_constraint("a", "b", Bound::new(20.0, 30.0))
            .unwrap();
        assert_eq!(network.consistency(), Consistency::Inconsistent);
        assert!(!network.is_consistent());
    }

    #[test]
    fn test_insert_validation() {
        let mut network = stn();
        assert!(matches!(
            network.add_constraint("a", "b", Bound::new(10.0, 5.0)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            network.add_constraint("a", "b", Bound::new(0.0, 1e9 + 1.0)),
            Err(Error::OutOfBounds(_))
        ));
        assert!(network
            .add_constraint("a", "b", Bound::new(0.0, 1e9))
            .is_ok());
        assert!(network
            .add_constraint("a", "c", Bound::at_least(0.0))
            .is_ok());
        assert!(matches!(
            network.add_constraint("a", "a", Bound::new(0.0, 1.0)),
            Err(Error::InvalidInput(_))
        ));
        assert!(network.add_constraint("a", "a", Bound::exact(0.0)).is_ok());
    }

    #[test]
    fn test_consistency_state_machine() {
        let mut network = stn();
        network
            .add_constraint("a", "b", Bound::new(0.0, 10.0))
            .unwrap();
        assert_eq!(network.consistency(), Consistency::Unknown);
        assert!(network.is_consistent());
        assert_eq!(network.consistency(), Consistency::Consistent);

        // Any add demotes Consistent to Unknown.
        network
            .add_constraint("b", "c", Bound::new(0.0, 5.0))
            .unwrap();
        assert_eq!(network.consistency(), Consistency::Unknown);
    }

    #[test]
    fn test_transitive_inconsistency_detected() {
        let mut network = stn();
        // a -> b in [5, 10], b -> c in [5, 10], but a -> c at most 3.
        network
            .add_constraint("a", "b", Bound::new(5.0, 10.0))
            .unwrap();
        network
            .add_constraint("b", "c", Bound::new(5.0, 10.0))
            .unwrap();
        network
            .add_constraint("a", "c", Bound::new(0.0, 3.0))
            .unwrap();
        assert!(!network.is_consistent());
    }

    #[test]
    fn test_union_intersects_overlaps() {
        let mut left = stn();
        left.add_constraint("a", "b", Bound::new(0.0, 100.0)).unwrap();
        let mut right = stn();
        right
            .add_constraint("a", "b", Bound::new(50.0, 200.0))
            .unwrap();
        right.add_constraint("b", "c", Bound::new(0.0, 5.0)).unwrap();

        let combined = Stn::union(&left, &right).unwrap();
        assert_eq!(
            combined.get_constraint("a", "b"),
            Some(Bound::new(50.0, 100.0))
        );
        assert_eq!(
            combined.get_constraint("b", "c"),
            Some(Bound::new(0.0, 5.0))
        );
    }

    #[test]
    fn test_union_commutative() {
        let mut left = stn();
        left.add_constraint("a", "b", Bound::new(0.0, 100.0)).unwrap();
        left.add_constraint("b", "c", Bound::new(10.0, 20.0)).unwrap();
        let mut right = stn();
        right
            .add_constraint("a", "b", Bound::new(50.0, 200.0))
            .unwrap();
        right.add_constraint("c", "d", Bound::new(1.0, 2.0)).unwrap();

        let ab = Stn::union(&left, &right).unwrap();
        let ba = Stn::union(&right, &left).unwrap();

        let mut points_ab: Vec<&str> = ab.time_points();
        let mut points_ba: Vec<&str> = ba.time_points();
        points_ab.sort_unstable();
        points_ba.sort_unstable();
        assert_eq!(points_ab, points_ba);
        assert_eq!(ab.constraint_triples(), ba.constraint_triples());
        assert_eq!(ab.consistency(), ba.consistency());
    }

    #[test]
    fn test_union_propagates_inconsistency() {
        let mut left = stn();
        left.add_constraint("a", "b", Bound::new(10.0, 15.0)).unwrap();
        left.add_constraint("b", "a", Bound::new(20.0, 25.0)).unwrap();
        left.check_consistency();

        let mut right = stn();
        right.add_constraint("x", "y", Bound::new(0.0, 1.0)).unwrap();

        let combined = Stn::union(&left, &right).unwrap();
        assert_eq!(combined.consistency(), Consistency::Inconsistent);
    }

    #[test]
    fn test_union_permissive_widens() {
        let mut left = stn();
        left.add_constraint("a", "b", Bound::new(0.0, 10.0)).unwrap();
        let mut right = stn();
        right
            .add_constraint("a", "b", Bound::new(20.0, 30.0))
            .unwrap();
        right.add_constraint("b", "c", Bound::new(0.0, 5.0)).unwrap();

        let combined = Stn::union_permissive(&left, &right).unwrap();
        assert_eq!(
            combined.get_constraint("a", "b"),
            Some(Bound::new(0.0, 30.0))
        );
        // Present in only one input: unconstrained in the other, dropped.
        assert_eq!(combined.get_constraint("b", "c"), None);
        assert!(combined.clone().is_consistent());
    }

    #[test]
    fn test_chain() {
        let mut first = stn();
        first.add_constraint("a", "b", Bound::new(0.0, 10.0)).unwrap();
        let mut second = stn();
        second.add_constraint("b", "c", Bound::new(0.0, 10.0)).unwrap();
        let mut third = stn();
        third.add_constraint("c", "d", Bound::new(0.0, 10.0)).unwrap();

        let combined = Stn::chain(&[first, second, third]).unwrap();
        assert_eq!(combined.time_points().len(), 4);
        assert_eq!(combined.constraint_triples().len(), 3);
    }

    #[test]
    fn test_split() {
        let mut network = stn();
        network.add_constraint("a", "b", Bound::new(0.0, 1.0)).unwrap();
        network.add_constraint("c", "d", Bound::new(0.0, 2.0)).unwrap();
        // Crosses the chunk boundary, so it must be filtered out.
        network.add_constraint("b", "c", Bound::new(0.0, 3.0)).unwrap();
        network.check_consistency();

        let segments = network.split(2);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].time_points(), vec!["a", "b"]);
        assert_eq!(segments[1].time_points(), vec!["c", "d"]);
        assert_eq!(
            segments[0].get_constraint("a", "b"),
            Some(Bound::new(0.0, 1.0))
        );
        assert_eq!(segments[0].get_constraint("b", "c"), None);
        // Consistent parent: segments inherit consistency.
        assert_eq!(segments[0].consistency(), Consistency::Consistent);
    }

    #[test]
    fn test_convert_units() {
        let mut network = stn();
        network
            .add_constraint("a", "b", Bound::new(60.0, f64::INFINITY))
            .unwrap();
        network.check_consistency();

        network.convert_units(TimeUnit::Minutes);
        let bound = network.get_constraint("a", "b").unwrap();
        assert_eq!(bound.min, 1.0);
        assert_eq!(bound.max, f64::INFINITY);
        // Scaling preserves feasibility and the cached status.
        assert_eq!(network.consistency(), Consistency::Consistent);
    }

    #[test]
    fn test_rescale_lod_rounds_outward() {
        let mut network = stn();
        network
            .add_constraint("a", "b", Bound::new(15.0, 27.0))
            .unwrap();
        network.rescale_lod(LodLevel::High);
        assert_eq!(
            network.get_constraint("a", "b"),
            Some(Bound::new(1.0, 3.0))
        );
        assert_eq!(network.lod_level(), LodLevel::High);
    }

    #[test]
    fn test_rescale_lod_merges_collapsed_points() {
        let mut network = stn();
        network.add_constraint("a", "b", Bound::exact(0.0)).unwrap();
        network.add_constraint("b", "c", Bound::new(5.0, 9.0)).unwrap();

        network.rescale_lod(LodLevel::High);
        assert_eq!(network.time_points(), vec!["a", "c"]);
        assert_eq!(
            network.get_constraint("a", "c"),
            Some(Bound::new(0.0, 1.0))
        );
    }

    #[test]
    fn test_auto_rescale_union_mixed_units() {
        let mut minutes = Stn::new(StnOptions {
            time_unit: TimeUnit::Minutes,
            ..StnOptions::default()
        });
        minutes
            .add_constraint("a", "b", Bound::new(1.0, 2.0))
            .unwrap();
        let mut seconds = stn();
        seconds
            .add_constraint("b", "c", Bound::new(30.0, 40.0))
            .unwrap();

        let combined = Stn::union(&minutes, &seconds).unwrap();
        assert_eq!(combined.time_unit(), TimeUnit::Seconds);
        assert_eq!(
            combined.get_constraint("a", "b"),
            Some(Bound::new(60.0, 120.0))
        );

        let mut strict_minutes = Stn::new(StnOptions {
            time_unit: TimeUnit::Minutes,
            auto_rescale: false,
            ..StnOptions::default()
        });
        strict_minutes
            .add_constraint("a", "b", Bound::new(1.0, 2.0))
            .unwrap();
        let mut strict_seconds = Stn::new(StnOptions {
            auto_rescale: false,
            ..StnOptions::default()
        });
        strict_seconds
            .add_constraint("b", "c", Bound::new(30.0, 40.0))
            .unwrap();
        assert!(Stn::union(&strict_minutes, &strict_seconds).is_err());
    }

    #[test]
    fn test_constant_work_mode() {
        let mut network = Stn::new(StnOptions {
            constant_work: true,
            max_timepoints: 4,
            ..StnOptions::default()
        });
        // Zero real constraints: steady state is consistent.
        assert!(network.check_consistency());
        assert!(network.time_points().is_empty());

        network.add_time_point("a").unwrap();
        network.add_time_point("b").unwrap();
        network.add_constraint("a", "b", Bound::new(0.0, 5.0)).unwrap();
        assert!(network.is_consistent());
        assert_eq!(network.time_points().len(), 2);

        network.add_time_point("c").unwrap();
        network.add_time_point("d").unwrap();
        assert!(matches!(
            network.add_time_point("e"),
            Err(Error::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_validate_plan_sequential() {
        let actions = vec![
            TimedAction::new("boil", 300.0),
            TimedAction::new("serve", 60.0),
        ];
        let precedence = vec![PrecedenceConstraint::Before {
            first: "boil".to_string(),
            second: "serve".to_string(),
        }];
        assert!(Stn::validate_plan(&actions, &precedence, StnOptions::default()).unwrap());
    }

    #[test]
    fn test_validate_plan_cycle_is_inconsistent() {
        let actions = vec![
            TimedAction::new("boil", 300.0),
            TimedAction::new("serve", 60.0),
        ];
        let precedence = vec![
            PrecedenceConstraint::Before {
                first: "boil".to_string(),
                second: "serve".to_string(),
            },
            PrecedenceConstraint::Before {
                first: "serve".to_string(),
                second: "boil".to_string(),
            },
        ];
        assert!(!Stn::validate_plan(&actions, &precedence, StnOptions::default()).unwrap());
    }

    #[test]
    fn test_apply_schedule() {
        let mut network = stn();
        network.add_constraint("a", "b", Bound::new(0.0, 5.0)).unwrap();

        let times = HashMap::from([("a".to_string(), 0.0), ("b".to_string(), 3.0)]);
        network.apply_schedule(&times);
        assert_eq!(network.scheduled_time("a"), Some(0.0));
        assert_eq!(network.scheduled_time("b"), Some(3.0));
        assert_eq!(network.consistency(), Consistency::Consistent);
    }

    proptest! {
        #[test]
        fn test_union_commutative_property(
            min1 in -100i64..100, width1 in 0i64..100,
            min2 in -100i64..100, width2 in 0i64..100,
        ) {
            let mut left = stn();
            left.add_constraint("a", "b", Bound::new(min1 as f64, (min1 + width1) as f64)).unwrap();
            let mut right = stn();
            right.add_constraint("a", "b", Bound::new(min2 as f64, (min2 + width2) as f64)).unwrap();

            let ab = Stn::union(&left, &right).unwrap();
            let ba = Stn::union(&right, &left).unwrap();
            prop_assert_eq!(ab.constraint_triples(), ba.constraint_triples());
            prop_assert_eq!(ab.consistency(), ba.consistency());
        }

        #[test]
        fn test_intersection_never_wider(
            min1 in -100i64..100, width1 in 0i64..100,
            min2 in -100i64..100, width2 in 0i64..100,
        ) {
            let a = Bound::new(min1 as f64, (min1 + width1) as f64);
            let b = Bound::new(min2 as f64, (min2 + width2) as f64);
            let narrowed = a.intersect(&b);
            prop_assert!(narrowed.min >= a.min && narrowed.min >= b.min);
            prop_assert!(narrowed.max <= a.max && narrowed.max <= b.max);
        }
    }
}
