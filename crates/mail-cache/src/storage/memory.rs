//! In-memory mail cache
//!
//! Same semantics as the SQLite cache without persistence. Used by tests and
//! for throwaway sessions.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::coverage::CoverageSet;
use super::traits::{CoverageStore, MailCache, RecordStore, TrimStats};
use crate::models::{EmailRecord, Interval, MessageId};
use crate::search::SenderPattern;

#[derive(Default)]
struct State {
    cover: CoverageSet,
    records: HashMap<MessageId, EmailRecord>,
}

/// In-memory implementation of MailCache
///
/// Records and coverage share one lock so a gap commit is observed whole.
#[derive(Default)]
pub struct InMemoryMailCache {
    state: RwLock<State>,
}

impl InMemoryMailCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("mail cache lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("mail cache lock poisoned"))
    }
}

impl State {
    fn upsert(&mut self, records: &[EmailRecord]) {
        for record in records {
            self.records
                .insert(record.message_id.clone(), record.clone());
        }
    }

    fn trim_records(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.date >= cutoff);
        before - self.records.len()
    }
}

impl CoverageStore for InMemoryMailCache {
    fn covered_intervals(&self) -> Result<Vec<Interval>> {
        Ok(self.read()?.cover.as_slice().to_vec())
    }

    fn gaps(&self, target: &Interval) -> Result<Vec<Interval>> {
        Ok(self.read()?.cover.gaps(target))
    }

    fn add_coverage(&self, interval: Interval) -> Result<()> {
        self.write()?.cover.insert(interval);
        Ok(())
    }

    fn trim_coverage(&self, cutoff: DateTime<Utc>) -> Result<()> {
        self.write()?.cover.trim(cutoff);
        Ok(())
    }
}

impl RecordStore for InMemoryMailCache {
    fn upsert_records(&self, records: &[EmailRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.write()?.upsert(records);
        Ok(records.len())
    }

    fn search_records(
        &self,
        pattern: &SenderPattern,
        window: Option<&Interval>,
    ) -> Result<Vec<EmailRecord>> {
        let state = self.read()?;
        Ok(state
            .records
            .values()
            .filter(|r| window.is_none_or(|w| w.contains(r.date)))
            .filter(|r| pattern.is_match(&r.from_address))
            .cloned()
            .collect())
    }

    fn trim_records(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.write()?.trim_records(cutoff))
    }

    fn get_record(&self, id: &MessageId) -> Result<Option<EmailRecord>> {
        Ok(self.read()?.records.get(id).cloned())
    }

    fn count_records(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }
}

impl MailCache for InMemoryMailCache {
    fn commit_gap(&self, records: &[EmailRecord], gap: &Interval) -> Result<()> {
        let mut state = self.write()?;
        state.upsert(records);
        state.cover.insert(*gap);
        Ok(())
    }

    fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<TrimStats> {
        let mut state = self.write()?;
        let records_removed = state.trim_records(cutoff);
        let intervals_before = state.cover.len();
        state.cover.trim(cutoff);
        Ok(TrimStats {
            records_removed,
            intervals_before,
            intervals_after: state.cover.len(),
        })
    }

    fn clear(&self) -> Result<()> {
        *self.write()? = State::default();
        Ok(())
    }
}
