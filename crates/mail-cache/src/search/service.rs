//! Reconciling sender search
//!
//! A search first works out which parts of its window the cache has never
//! seen, fetches only those from the server, commits each one, and then
//! answers entirely from the cache.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

use super::pattern::{InvalidPattern, SenderPattern};
use crate::cancel::CancellationToken;
use crate::imap::{
    BatchFetcher, ConnectionPool, DEFAULT_BATCH_SIZE, DeepLinkTemplate, FetchError, SessionFactory,
};
use crate::models::{EmailRecord, Interval, saturating_before, sort_newest_first};
use crate::storage::{CoverageStore, MailCache, RecordStore, TrimStats};

/// Window used when a search names no lookback
pub const DEFAULT_LOOKBACK_DAYS: u32 = 365;

/// Convert an optional day count into a lookback window
pub fn lookback_days(days: Option<u32>) -> Option<Duration> {
    days.map(|d| Duration::days(i64::from(d)))
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    InvalidPattern(#[from] InvalidPattern),
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
    /// Every gap failed to reach the server; `cached` holds what the cache
    /// alone could answer
    #[error("mail server unreachable: {reason}")]
    Offline {
        cached: Vec<EmailRecord>,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub default_lookback: Duration,
    /// Messages per header fetch
    pub batch_size: usize,
    pub links: DeepLinkTemplate,
    /// Fetch gaps concurrently on the rayon pool
    pub parallel_gaps: bool,
    /// Mark a gap covered even when the server returned nothing for it
    pub record_empty_gaps: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            default_lookback: Duration::days(i64::from(DEFAULT_LOOKBACK_DAYS)),
            batch_size: DEFAULT_BATCH_SIZE,
            links: DeepLinkTemplate::default(),
            parallel_gaps: true,
            record_empty_gaps: false,
        }
    }
}

/// Statistics from one reconcile pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Gaps the cache had in the search window
    pub gaps: usize,
    /// Gaps fetched without error
    pub fetched_gaps: usize,
    /// Gaps whose fetch failed or was cancelled
    pub failed_gaps: usize,
    /// Records written to the cache
    pub records_fetched: usize,
    /// Server messages that could not be decoded
    pub messages_skipped: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    /// Matching records, newest first
    pub results: Vec<EmailRecord>,
    pub stats: ReconcileStats,
}

enum GapResult {
    Fetched { records: usize, skipped: usize },
    Failed(FetchError),
}

/// Sender search over a cache kept in sync with one mailbox
pub struct SearchService<C: MailCache, F: SessionFactory> {
    store: Arc<C>,
    pool: ConnectionPool<F>,
    options: SearchOptions,
}

impl<C: MailCache, F: SessionFactory> SearchService<C, F> {
    pub fn new(store: Arc<C>, pool: ConnectionPool<F>, options: SearchOptions) -> Self {
        Self {
            store,
            pool,
            options,
        }
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }

    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Search the last `lookback` (or the default window) for senders matching `pattern`
    pub fn search(
        &self,
        pattern: &str,
        lookback: Option<Duration>,
    ) -> Result<SearchReport, SearchError> {
        self.search_at(Utc::now(), pattern, lookback, &CancellationToken::new())
    }

    pub fn search_with_cancel(
        &self,
        pattern: &str,
        lookback: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<SearchReport, SearchError> {
        self.search_at(Utc::now(), pattern, lookback, cancel)
    }

    /// Search the window ending at `now`
    ///
    /// The pattern is validated before the cache or the server is touched.
    /// Failed gaps are logged and left uncovered so the next search retries
    /// them; a failed commit aborts the search.
    pub fn search_at(
        &self,
        now: DateTime<Utc>,
        pattern: &str,
        lookback: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<SearchReport, SearchError> {
        let start = Instant::now();
        let pattern = SenderPattern::new(pattern)?;

        let target = Interval::lookback(now, lookback.unwrap_or(self.options.default_lookback));
        let gaps = self.store.gaps(&target).map_err(SearchError::Storage)?;

        let mut stats = ReconcileStats {
            gaps: gaps.len(),
            ..Default::default()
        };
        if gaps.is_empty() {
            debug!("{} fully cached", target);
        } else {
            info!("Searching {}: {} gaps to fetch", target, gaps.len());
        }

        let fetcher = BatchFetcher::new(&self.pool)
            .with_batch_size(self.options.batch_size)
            .with_links(self.options.links.clone());

        let outcomes: Vec<Result<GapResult, SearchError>> =
            if self.options.parallel_gaps && gaps.len() > 1 {
                gaps.par_iter()
                    .map(|gap| self.reconcile_gap(&fetcher, gap, cancel))
                    .collect()
            } else {
                gaps.iter()
                    .map(|gap| self.reconcile_gap(&fetcher, gap, cancel))
                    .collect()
            };

        let mut offline_reason = None;
        let mut connectivity_failures = 0;
        for outcome in outcomes {
            match outcome? {
                GapResult::Fetched { records, skipped } => {
                    stats.fetched_gaps += 1;
                    stats.records_fetched += records;
                    stats.messages_skipped += skipped;
                }
                GapResult::Failed(e) => {
                    stats.failed_gaps += 1;
                    if e.is_connectivity() {
                        connectivity_failures += 1;
                        offline_reason = Some(e.to_string());
                    }
                }
            }
        }

        let mut results = self
            .store
            .search_records(&pattern, Some(&target))
            .map_err(SearchError::Storage)?;
        sort_newest_first(&mut results);
        stats.duration_ms = start.elapsed().as_millis() as u64;

        if stats.gaps > 0 && connectivity_failures == stats.gaps {
            return Err(SearchError::Offline {
                cached: results,
                reason: offline_reason.unwrap_or_default(),
            });
        }

        info!(
            "Found {} messages from {:?} ({} gaps fetched, {} failed, {} new records) in {}ms",
            results.len(),
            pattern.as_str(),
            stats.fetched_gaps,
            stats.failed_gaps,
            stats.records_fetched,
            stats.duration_ms
        );

        Ok(SearchReport { results, stats })
    }

    fn reconcile_gap(
        &self,
        fetcher: &BatchFetcher<'_, F>,
        gap: &Interval,
        cancel: &CancellationToken,
    ) -> Result<GapResult, SearchError> {
        if cancel.is_cancelled() {
            return Ok(GapResult::Failed(FetchError::Cancelled { batches: 0 }));
        }

        let outcome = match fetcher.fetch(gap, cancel) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to fetch {}: {}", gap, e);
                return Ok(GapResult::Failed(e));
            }
        };

        if !outcome.records.is_empty() || self.options.record_empty_gaps {
            self.store
                .commit_gap(&outcome.records, gap)
                .map_err(SearchError::Storage)?;
        }
        debug!(
            "{}: {} records cached, {} skipped",
            gap,
            outcome.records.len(),
            outcome.skipped
        );

        Ok(GapResult::Fetched {
            records: outcome.records.len(),
            skipped: outcome.skipped,
        })
    }

    /// Drop cached records and coverage older than `retention`
    pub fn enforce_retention(&self, retention: Duration) -> Result<TrimStats> {
        self.enforce_retention_at(Utc::now(), retention)
    }

    pub fn enforce_retention_at(&self, now: DateTime<Utc>, retention: Duration) -> Result<TrimStats> {
        let cutoff = saturating_before(now, retention);
        let stats = self.store.trim_before(cutoff)?;
        info!(
            "Retention before {}: removed {} records, {} -> {} covered intervals",
            cutoff.format("%Y-%m-%d"),
            stats.records_removed,
            stats.intervals_before,
            stats.intervals_after
        );
        Ok(stats)
    }

    /// Close the idle pooled sessions
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
