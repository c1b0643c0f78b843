//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::coverage::CoverageSet;
use crate::models::{EmailRecord, Interval, MessageId};
use crate::search::SenderPattern;

/// Persistent set of time intervals that have been fully fetched
pub trait CoverageStore: Send + Sync {
    /// The canonical cover, sorted by start
    fn covered_intervals(&self) -> Result<Vec<Interval>>;

    /// Sub-intervals of `target` that still need fetching
    fn gaps(&self, target: &Interval) -> Result<Vec<Interval>> {
        let cover = CoverageSet::from_intervals(self.covered_intervals()?);
        Ok(cover.gaps(target))
    }

    /// Mark `interval` as covered, merging it into the canonical cover
    fn add_coverage(&self, interval: Interval) -> Result<()>;

    /// Forget coverage before `cutoff`
    fn trim_coverage(&self, cutoff: DateTime<Utc>) -> Result<()>;
}

/// Persistent keyed set of fetched message metadata
pub trait RecordStore: Send + Sync {
    /// Insert or replace records by message id, returning how many were written
    ///
    /// An empty slice is a no-op and does not touch the database.
    fn upsert_records(&self, records: &[EmailRecord]) -> Result<usize>;

    /// Records whose sender matches `pattern`, optionally restricted to a date
    /// window (inclusive on both ends). Order is unspecified.
    fn search_records(
        &self,
        pattern: &SenderPattern,
        window: Option<&Interval>,
    ) -> Result<Vec<EmailRecord>>;

    /// Delete records dated strictly before `cutoff`, returning how many went
    fn trim_records(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Get a record by message id
    fn get_record(&self, id: &MessageId) -> Result<Option<EmailRecord>>;

    /// Count cached records
    fn count_records(&self) -> Result<usize>;
}

/// What a retention pass removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrimStats {
    pub records_removed: usize,
    pub intervals_before: usize,
    pub intervals_after: usize,
}

/// Combined record + coverage store with atomic units of work
pub trait MailCache: CoverageStore + RecordStore {
    /// Upsert `records`, then add `gap` to coverage, as one transaction
    ///
    /// Either both changes become visible or neither does.
    fn commit_gap(&self, records: &[EmailRecord], gap: &Interval) -> Result<()>;

    /// Retention pass over both stores in one transaction
    fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<TrimStats>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
