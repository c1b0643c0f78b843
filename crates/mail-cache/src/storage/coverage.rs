//! Canonical cover of already-fetched time
//!
//! A [`CoverageSet`] is a sorted sequence of pairwise non-overlapping
//! intervals. Every mutation goes through insert-then-reduce so the set is
//! always canonical. Both storage backends keep their coverage in this form.

use chrono::{DateTime, Utc};

use crate::models::Interval;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageSet {
    intervals: Vec<Interval>,
}

impl CoverageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a canonical cover from intervals in any order, possibly overlapping
    pub fn from_intervals(intervals: impl IntoIterator<Item = Interval>) -> Self {
        Self {
            intervals: reduce(intervals.into_iter().collect()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn into_vec(self) -> Vec<Interval> {
        self.intervals
    }

    /// Whether the instant `at` is covered
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.intervals.iter().any(|i| i.contains(at))
    }

    /// Append `interval` and re-normalize the whole set
    pub fn insert(&mut self, interval: Interval) {
        let mut all = std::mem::take(&mut self.intervals);
        all.push(interval);
        self.intervals = reduce(all);
    }

    /// Sub-intervals of `target` not covered by this set, in ascending order
    ///
    /// Gaps that border covered time share the boundary instant with it:
    /// a cover of `[3, 5]` inside a target of `[1, 10]` yields `[1, 3]` and
    /// `[5, 10]`.
    pub fn gaps(&self, target: &Interval) -> Vec<Interval> {
        if self.intervals.is_empty() {
            return vec![*target];
        }

        if target.is_instant() {
            return if self.covers(target.start()) {
                Vec::new()
            } else {
                vec![*target]
            };
        }

        let mut gaps = Vec::new();
        let mut cursor = target.start();

        for cached in &self.intervals {
            // Everything from here on starts at or after the target end
            if cached.start() >= target.end() {
                break;
            }
            if cached.start() > cursor {
                gaps.push(bounded(cursor, cached.start()));
            }
            cursor = cursor.max(cached.end());
        }

        if cursor < target.end() {
            gaps.push(bounded(cursor, target.end()));
        }

        gaps
    }

    /// Drop coverage entirely before `cutoff`; clip intervals straddling it
    pub fn trim(&mut self, cutoff: DateTime<Utc>) {
        self.intervals = self
            .intervals
            .iter()
            .filter_map(|i| i.clip_start(cutoff))
            .collect();
    }
}

/// Sort by start and merge overlapping neighbours in one linear scan
fn reduce(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_by_key(|i| i.start());

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for next in intervals {
        match merged.last_mut() {
            Some(current) => match current.merge(&next) {
                Some(joined) => *current = joined,
                None => merged.push(next),
            },
            None => merged.push(next),
        }
    }
    merged
}

fn bounded(start: DateTime<Utc>, end: DateTime<Utc>) -> Interval {
    // Callers only pass start < end
    Interval::new(start, end).unwrap_or_else(|_| Interval::instant(start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn iv(a: u32, b: u32) -> Interval {
        Interval::new(day(a), day(b)).unwrap()
    }

    #[test]
    fn test_empty_cover_yields_whole_target() {
        let cover = CoverageSet::new();
        assert_eq!(cover.gaps(&iv(1, 10)), vec![iv(1, 10)]);
    }

    #[test]
    fn test_gaps_around_cached_middle() {
        let cover = CoverageSet::from_intervals([iv(3, 5)]);
        assert_eq!(cover.gaps(&iv(1, 10)), vec![iv(1, 3), iv(5, 10)]);
    }

    #[test]
    fn test_insert_merges_overlapping() {
        let mut cover = CoverageSet::new();
        cover.insert(iv(1, 5));
        cover.insert(iv(4, 10));
        assert_eq!(cover.as_slice(), &[iv(1, 10)]);
    }

    #[test]
    fn test_insert_merges_touching_and_bridges() {
        let mut cover = CoverageSet::from_intervals([iv(1, 2), iv(5, 6), iv(9, 10)]);
        assert_eq!(cover.len(), 3);

        cover.insert(iv(2, 9));
        assert_eq!(cover.as_slice(), &[iv(1, 10)]);
    }

    #[test]
    fn test_cover_left_of_target_is_skipped() {
        let cover = CoverageSet::from_intervals([iv(1, 2)]);
        assert_eq!(cover.gaps(&iv(4, 8)), vec![iv(4, 8)]);
    }

    #[test]
    fn test_cover_right_of_target_does_not_extend_gap() {
        let cover = CoverageSet::from_intervals([iv(20, 25)]);
        assert_eq!(cover.gaps(&iv(4, 8)), vec![iv(4, 8)]);
    }

    #[test]
    fn test_partial_overlaps_on_both_sides() {
        let cover = CoverageSet::from_intervals([iv(1, 4), iv(8, 12)]);
        assert_eq!(cover.gaps(&iv(2, 10)), vec![iv(4, 8)]);
    }

    #[test]
    fn test_fully_covered_target_has_no_gaps() {
        let cover = CoverageSet::from_intervals([iv(1, 10)]);
        assert!(cover.gaps(&iv(2, 9)).is_empty());
        assert!(cover.gaps(&iv(1, 10)).is_empty());
    }

    #[test]
    fn test_cover_ending_at_target_end() {
        let cover = CoverageSet::from_intervals([iv(5, 10)]);
        assert_eq!(cover.gaps(&iv(1, 10)), vec![iv(1, 5)]);
    }

    #[test]
    fn test_instant_target() {
        let cover = CoverageSet::from_intervals([iv(5, 7)]);
        assert!(cover.gaps(&Interval::instant(day(5))).is_empty());
        assert!(cover.gaps(&Interval::instant(day(7))).is_empty());
        assert_eq!(
            cover.gaps(&Interval::instant(day(8))),
            vec![Interval::instant(day(8))]
        );
        assert_eq!(
            cover.gaps(&Interval::instant(day(4))),
            vec![Interval::instant(day(4))]
        );
    }

    #[test]
    fn test_trim_clips_and_removes() {
        let mut cover = CoverageSet::from_intervals([iv(1, 3), iv(5, 10), iv(12, 14)]);
        cover.trim(day(6));
        assert_eq!(cover.as_slice(), &[iv(6, 10), iv(12, 14)]);

        cover.trim(day(20));
        assert!(cover.is_empty());
    }

    #[test]
    fn test_trim_keeps_interval_ending_at_cutoff() {
        let mut cover = CoverageSet::from_intervals([iv(1, 6)]);
        cover.trim(day(6));
        assert_eq!(cover.as_slice(), &[Interval::instant(day(6))]);
    }

    // Property tests work on minute offsets from a fixed epoch so interval
    // arithmetic stays exact.

    fn minute(m: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(m)
    }

    fn arb_interval() -> impl Strategy<Value = Interval> {
        (0i64..500, 0i64..60)
            .prop_map(|(start, len)| Interval::new(minute(start), minute(start + len)).unwrap())
    }

    fn arb_cover() -> impl Strategy<Value = CoverageSet> {
        prop::collection::vec(arb_interval(), 0..12).prop_map(CoverageSet::from_intervals)
    }

    fn is_canonical(intervals: &[Interval]) -> bool {
        intervals
            .windows(2)
            .all(|w| w[0].end() < w[1].start())
    }

    /// Whether the instant lies in the interior of some gap
    fn strictly_inside_gap(gaps: &[Interval], at: DateTime<Utc>) -> bool {
        gaps.iter().any(|g| g.start() < at && at < g.end())
    }

    proptest! {
        #[test]
        fn cover_stays_canonical(cover in arb_cover()) {
            prop_assert!(is_canonical(cover.as_slice()));
        }

        #[test]
        fn gaps_are_sorted_disjoint_and_within_target(cover in arb_cover(), target in arb_interval()) {
            let gaps = cover.gaps(&target);
            for g in &gaps {
                prop_assert!(target.start() <= g.start() && g.end() <= target.end());
            }
            for w in gaps.windows(2) {
                prop_assert!(w[0].end() < w[1].start());
            }
        }

        #[test]
        fn gaps_complement_cover_within_target(cover in arb_cover(), target in arb_interval()) {
            let gaps = cover.gaps(&target);
            let mut m = target.start();
            while m <= target.end() {
                let covered = cover.covers(m);
                if strictly_inside_gap(&gaps, m) {
                    prop_assert!(!covered, "gap interior {} is covered", m);
                } else if !gaps.iter().any(|g| g.contains(m)) {
                    prop_assert!(covered, "uncovered instant {} missing from gaps", m);
                }
                m += Duration::minutes(1);
            }
        }

        #[test]
        fn insert_is_idempotent(cover in arb_cover(), extra in arb_interval()) {
            let mut once = cover.clone();
            once.insert(extra);
            let mut twice = once.clone();
            twice.insert(extra);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn insert_is_monotonic(inserts in prop::collection::vec(arb_interval(), 1..10)) {
            let mut cover = CoverageSet::new();
            let mut seen: Vec<Interval> = Vec::new();
            for next in inserts {
                cover.insert(next);
                seen.push(next);
                for earlier in &seen {
                    prop_assert!(cover.covers(earlier.start()));
                    prop_assert!(cover.covers(earlier.end()));
                }
                prop_assert!(is_canonical(cover.as_slice()));
            }
        }

        #[test]
        fn filling_gaps_covers_target(cover in arb_cover(), target in arb_interval()) {
            let mut filled = cover.clone();
            for gap in cover.gaps(&target) {
                filled.insert(gap);
            }
            prop_assert!(filled.gaps(&target).is_empty());
        }
    }
}
