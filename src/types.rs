//! Core value types shared by every layer of the engine
//!
//! # Main Types
//!
//! - [`TimePoint`] - An animation time expressed in integer ticks
//! - [`TimeInterval`] - Half-open validity range `[start, end)` of computed data
//! - [`PipelineStatus`] - Outcome of a pipeline stage (success, warning, error)
//! - [`ExecutionContext`] - Logical mode in which graph work is performed
//!
//! # Time Intervals
//!
//! Intervals are half-open, so two intervals that share an end point do not
//! overlap but *touch*. The canonical "always valid" interval spans the whole
//! time axis. An end of `TimePoint::MAX` is open-ended and includes the
//! maximum tick; any other interval with `start >= end` is empty and
//! intersects nothing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Animation time in ticks
pub type TimePoint = i64;

/// Half-open time range `[start, end)` over which a computed state is valid
///
/// An end of `TimePoint::MAX` is unbounded and includes `TimePoint::MAX`
/// itself, so every time point has a non-empty instant interval. Internally
/// the last covered tick is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    start: TimePoint,
    last: TimePoint,
}

impl TimeInterval {
    /// Create an interval from its bounds. `start >= end` yields an empty interval.
    pub const fn new(start: TimePoint, end: TimePoint) -> Self {
        if end == TimePoint::MAX {
            return Self::closed(start, TimePoint::MAX);
        }
        if start >= end {
            return Self::empty();
        }
        Self::closed(start, end - 1)
    }

    /// Create the interval `[start, last]`.
    pub const fn closed(start: TimePoint, last: TimePoint) -> Self {
        Self { start, last }
    }

    /// The interval covering the full time axis
    pub const fn infinite() -> Self {
        Self::closed(TimePoint::MIN, TimePoint::MAX)
    }

    /// The canonical empty interval
    pub const fn empty() -> Self {
        Self { start: 0, last: -1 }
    }

    /// The single-tick interval containing only `time`
    pub const fn instant(time: TimePoint) -> Self {
        Self::closed(time, time)
    }

    pub fn start(&self) -> TimePoint {
        self.start
    }

    /// Exclusive end, saturating at `TimePoint::MAX`
    pub fn end(&self) -> TimePoint {
        self.last.saturating_add(1)
    }

    /// Last tick covered by the interval
    pub fn last(&self) -> TimePoint {
        self.last
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.last
    }

    pub fn is_infinite(&self) -> bool {
        self.start == TimePoint::MIN && self.last == TimePoint::MAX
    }

    /// Whether `time` lies inside this interval
    pub fn contains_time(&self, time: TimePoint) -> bool {
        self.start <= time && time <= self.last
    }

    /// Whether `other` is non-empty and lies completely inside this interval
    pub fn contains(&self, other: &TimeInterval) -> bool {
        !other.is_empty() && self.start <= other.start && other.last <= self.last
    }

    /// Whether both intervals share at least one tick
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start <= other.last
            && other.start <= self.last
    }

    /// Whether the intervals overlap or are directly adjacent
    pub fn touches(&self, other: &TimeInterval) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start <= other.last.saturating_add(1)
            && other.start <= self.last.saturating_add(1)
    }

    /// The common part of both intervals
    pub fn intersection(&self, other: &TimeInterval) -> TimeInterval {
        if !self.overlaps(other) {
            return TimeInterval::empty();
        }
        TimeInterval::closed(self.start.max(other.start), self.last.min(other.last))
    }

    /// Restrict this interval to its intersection with `other`
    pub fn intersect(&mut self, other: &TimeInterval) {
        *self = self.intersection(other);
    }

    /// Smallest interval containing both. Empty inputs are ignored.
    pub fn hull(&self, other: &TimeInterval) -> TimeInterval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        TimeInterval::closed(self.start.min(other.start), self.last.max(other.last))
    }

    /// The parts of this interval not covered by `other` (at most two pieces)
    pub fn subtract(&self, other: &TimeInterval) -> Vec<TimeInterval> {
        if !self.overlaps(other) {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        }
        let mut pieces = Vec::with_capacity(2);
        if self.start < other.start {
            pieces.push(TimeInterval::closed(self.start, other.start - 1));
        }
        if other.last < self.last {
            pieces.push(TimeInterval::closed(other.last + 1, self.last));
        }
        pieces
    }
}

impl Default for TimeInterval {
    fn default() -> Self {
        Self::infinite()
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "[empty]");
        }
        let start = if self.start == TimePoint::MIN {
            "-inf".to_string()
        } else {
            self.start.to_string()
        };
        if self.last == TimePoint::MAX {
            return write!(f, "[{}, +inf)", start);
        }
        write!(f, "[{}, {})", start, self.end())
    }
}

/// Severity of a pipeline status, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum StatusKind {
    #[default]
    Success,
    Warning,
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Success => write!(f, "Success"),
            StatusKind::Warning => write!(f, "Warning"),
            StatusKind::Error => write!(f, "Error"),
        }
    }
}

/// Result status reported by a pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub kind: StatusKind,
    pub message: String,
}

impl PipelineStatus {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Self::default()
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, message)
    }

    pub fn is_error(&self) -> bool {
        self.kind == StatusKind::Error
    }

    /// Return whichever of the two statuses is more severe (`self` wins ties)
    pub fn worst(self, other: PipelineStatus) -> PipelineStatus {
        if other.kind > self.kind {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Logical mode in which graph work runs
///
/// Work marshaled back to the main context always runs in the mode that was
/// active when it was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExecutionContext {
    /// Triggered by the user through an interactive front end
    #[default]
    Interactive,
    /// Triggered by a script or batch job
    Scripting,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Interactive => write!(f, "Interactive"),
            ExecutionContext::Scripting => write!(f, "Scripting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_interval() {
        let iv = TimeInterval::instant(5);
        assert!(iv.contains_time(5));
        assert!(!iv.contains_time(6));
        assert_eq!(iv.end() - iv.start(), 1);
    }

    #[test]
    fn test_empty_never_intersects() {
        let empty = TimeInterval::empty();
        assert!(empty.is_empty());
        assert!(!empty.overlaps(&TimeInterval::infinite()));
        assert!(!TimeInterval::infinite().contains(&empty));
        assert!(TimeInterval::new(5, 3).is_empty());
    }

    #[test]
    fn test_half_open_overlap() {
        let a = TimeInterval::new(10, 20);
        let b = TimeInterval::new(20, 30);
        assert!(!a.overlaps(&b));
        assert!(a.touches(&b));
        assert_eq!(a.hull(&b), TimeInterval::new(10, 30));
        assert!(a.intersection(&b).is_empty());
    }

    #[test]
    fn test_subtract_splits() {
        let a = TimeInterval::new(0, 30);
        let pieces = a.subtract(&TimeInterval::new(10, 20));
        assert_eq!(
            pieces,
            vec![TimeInterval::new(0, 10), TimeInterval::new(20, 30)]
        );
        assert_eq!(
            TimeInterval::new(10, 20).subtract(&TimeInterval::new(15, 25)),
            vec![TimeInterval::new(10, 15)]
        );
        assert!(TimeInterval::new(10, 20)
            .subtract(&TimeInterval::infinite())
            .is_empty());
    }

    #[test]
    fn test_infinite_contains_everything() {
        let inf = TimeInterval::infinite();
        assert!(inf.is_infinite());
        assert!(inf.contains(&TimeInterval::instant(TimePoint::MIN)));
        assert!(inf.contains(&TimeInterval::new(-100, 100)));
        assert_eq!(inf.to_string(), "[-inf, +inf)");
    }

    #[test]
    fn test_maximum_time_point_is_representable() {
        let top = TimeInterval::instant(TimePoint::MAX);
        assert!(!top.is_empty());
        assert!(top.contains_time(TimePoint::MAX));
        assert!(!top.contains_time(TimePoint::MAX - 1));
        assert!(top.contains(&top));
        assert!(top.overlaps(&top));
        assert!(TimeInterval::infinite().contains(&top));
        assert!(TimeInterval::new(0, 10).contains(&TimeInterval::instant(9)));
        assert!(!TimeInterval::new(0, 10).contains(&top));
        assert_eq!(top.intersection(&TimeInterval::infinite()), top);

        let below = TimeInterval::instant(TimePoint::MAX - 1);
        assert!(!below.overlaps(&top));
        assert!(below.touches(&top));
        assert_eq!(below.hull(&top), TimeInterval::new(TimePoint::MAX - 1, TimePoint::MAX));
        assert_eq!(
            TimeInterval::new(0, TimePoint::MAX).subtract(&top),
            vec![TimeInterval::closed(0, TimePoint::MAX - 1)]
        );
        assert_eq!(
            TimeInterval::infinite().subtract(&below),
            vec![TimeInterval::closed(TimePoint::MIN, TimePoint::MAX - 2), top]
        );
    }

    #[test]
    fn test_status_worst() {
        let ok = PipelineStatus::success();
        let warn = PipelineStatus::warning("few particles");
        let err = PipelineStatus::error("boom");
        assert_eq!(ok.clone().worst(warn.clone()), warn);
        assert_eq!(err.clone().worst(warn), err);
        assert_eq!(err.to_string(), "Error: boom");
    }
}
