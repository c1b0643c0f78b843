//! Closed time intervals with overlap/merge algebra

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when an interval would end before it starts
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("interval ends before it starts ({start} > {end})")]
pub struct InvalidInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A closed time range `[start, end]`
///
/// Both ends are inclusive, so two intervals that merely touch overlap.
/// A zero-length interval (`start == end`) covers exactly one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Unchecked wire form, validated through [`Interval::new`]
#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawInterval> for Interval {
    type Error = InvalidInterval;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        Interval::new(raw.start, raw.end)
    }
}

impl Interval {
    /// Create an interval, rejecting `start > end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InvalidInterval> {
        if start > end {
            return Err(InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// A zero-length interval covering the single instant `at`
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    /// The window `[now - lookback, now]`
    ///
    /// Negative lookbacks are treated as zero. A lookback reaching past the
    /// earliest representable instant starts there instead.
    pub fn lookback(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            start: saturating_before(now, lookback),
            end: now,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    /// Whether `at` lies within the interval, both ends inclusive
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Closed-interval overlap: touching endpoints count
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Smallest interval spanning both, defined only when they overlap
    pub fn merge(&self, other: &Interval) -> Option<Interval> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Interval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        })
    }

    /// Copy of this interval with `start` raised to `cutoff`
    ///
    /// Returns `None` when the whole interval lies before `cutoff`.
    pub fn clip_start(&self, cutoff: DateTime<Utc>) -> Option<Interval> {
        if self.end < cutoff {
            return None;
        }
        Some(Interval {
            start: self.start.max(cutoff),
            end: self.end,
        })
    }
}

/// `now - lookback`, saturating at the earliest representable instant
///
/// Negative lookbacks are treated as zero.
pub fn saturating_before(now: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(lookback.max(Duration::zero()))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} → {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
