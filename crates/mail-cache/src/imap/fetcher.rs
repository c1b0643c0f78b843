//! Batched header retrieval for one time interval

use log::{debug, info};

use super::decode::{DeepLinkTemplate, decode_record};
use super::pool::ConnectionPool;
use super::session::{ConnectError, DateCriteria, MailSession, ProtocolError, SessionFactory};
use crate::cancel::CancellationToken;
use crate::models::{EmailRecord, Interval};

/// Default number of messages per header fetch
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no session available: {0}")]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("fetch cancelled after {batches} batches")]
    Cancelled { batches: usize },
}

impl FetchError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, FetchError::Connect(_))
    }
}

/// Result of fetching one interval
#[derive(Debug, Default, Clone)]
pub struct FetchOutcome {
    pub records: Vec<EmailRecord>,
    /// Messages the server search matched
    pub searched: usize,
    /// Messages left out because no headers came back or they failed to decode
    pub skipped: usize,
    /// Header fetch round trips made
    pub batches: usize,
}

/// Searches an interval and pulls its headers in fixed-size batches
pub struct BatchFetcher<'p, F: SessionFactory> {
    pool: &'p ConnectionPool<F>,
    batch_size: usize,
    links: DeepLinkTemplate,
}

impl<'p, F: SessionFactory> BatchFetcher<'p, F> {
    pub fn new(pool: &'p ConnectionPool<F>) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
            links: DeepLinkTemplate::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_links(mut self, links: DeepLinkTemplate) -> Self {
        self.links = links;
        self
    }

    /// Fetch metadata for every message in `interval`
    ///
    /// Holds one pooled session for the whole call. The session goes back to
    /// the pool on success and on cancellation; a session that hit a protocol
    /// error is logged out instead. Cancellation is checked between batches.
    pub fn fetch(
        &self,
        interval: &Interval,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let mut session = self.pool.checkout()?;

        match self.fetch_with(&mut *session, interval, cancel) {
            Err(FetchError::Protocol(e)) => {
                session.discard();
                Err(FetchError::Protocol(e))
            }
            result => result,
        }
    }

    fn fetch_with(
        &self,
        session: &mut F::Session,
        interval: &Interval,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let criteria = DateCriteria::for_interval(interval);
        let ids = session.search(&criteria)?;

        let mut outcome = FetchOutcome {
            searched: ids.len(),
            ..Default::default()
        };
        if ids.is_empty() {
            return Ok(outcome);
        }

        let total_batches = ids.len().div_ceil(self.batch_size);
        info!(
            "Fetching {} messages for {} in {} batches",
            ids.len(),
            interval,
            total_batches
        );

        for batch in ids.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled {
                    batches: outcome.batches,
                });
            }

            let fetched = session.fetch_headers(batch)?;
            outcome.batches += 1;

            let mut decoded = 0;
            for (uid, raw) in &fetched {
                match decode_record(raw.as_deref(), &self.links) {
                    Ok(record) => {
                        outcome.records.push(record);
                        decoded += 1;
                    }
                    Err(e) => debug!("Skipping message {}: {}", uid, e),
                }
            }

            // Ids the server left out of the response count as skipped too
            outcome.skipped += batch.len().saturating_sub(decoded);
            debug!(
                "Batch {}/{}: {} of {} messages decoded",
                outcome.batches,
                total_batches,
                decoded,
                batch.len()
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::pool::PoolSettings;
    use crate::imap::testing::ScriptedFactory;
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap()
    }

    fn iv(a: u32, b: u32) -> Interval {
        Interval::new(day(a), day(b)).unwrap()
    }

    fn pool(factory: &ScriptedFactory) -> ConnectionPool<ScriptedFactory> {
        ConnectionPool::new(
            factory.clone(),
            PoolSettings {
                workers: 1,
                checkout_timeout: Duration::from_millis(20),
                checkin_timeout: Duration::from_millis(20),
                probe_idle: false,
            },
        )
    }

    fn seed(factory: &ScriptedFactory, count: u32) {
        for uid in 1..=count {
            factory.add_email(
                uid,
                &format!("<m{}@example.com>", uid),
                "dave@example.com",
                &format!("Note {}", uid),
                day(1 + uid % 9),
            );
        }
    }

    #[test]
    fn test_missing_headers_skipped_without_error() {
        let factory = ScriptedFactory::new();
        seed(&factory, 3);
        factory.drop_headers(2);
        let pool = pool(&factory);

        let outcome = BatchFetcher::new(&pool)
            .fetch(&iv(1, 10), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.searched, 3);
        assert!(
            outcome
                .records
                .iter()
                .all(|r| r.message_id.as_str() != "<m2@example.com>")
        );
    }

    #[test]
    fn test_undecodable_headers_skipped() {
        let factory = ScriptedFactory::new();
        seed(&factory, 1);
        factory.add_raw(2, day(3), "Subject: no sender or id\r\n\r\n");
        let pool = pool(&factory);

        let outcome = BatchFetcher::new(&pool)
            .fetch(&iv(1, 10), &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn test_batches_bounded_by_size() {
        let factory = ScriptedFactory::new();
        seed(&factory, 7);
        let pool = pool(&factory);

        let outcome = BatchFetcher::new(&pool)
            .with_batch_size(3)
            .fetch(&iv(1, 10), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.batches, 3);
        assert_eq!(factory.fetches(), 3);
        assert_eq!(outcome.records.len(), 7);
    }

    #[test]
    fn test_search_includes_whole_end_day() {
        let factory = ScriptedFactory::new();
        factory.add_email(1, "<late@x>", "a@x", "late", Utc.with_ymd_and_hms(2024, 1, 5, 23, 0, 0).unwrap());
        let pool = pool(&factory);

        let outcome = BatchFetcher::new(&pool)
            .fetch(&iv(1, 5), &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_empty_search_makes_no_fetch() {
        let factory = ScriptedFactory::new();
        let pool = pool(&factory);

        let outcome = BatchFetcher::new(&pool)
            .fetch(&iv(1, 10), &CancellationToken::new())
            .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(factory.fetches(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_session_returned_after_fetch() {
        let factory = ScriptedFactory::new();
        seed(&factory, 4);
        let pool = pool(&factory);

        BatchFetcher::new(&pool)
            .fetch(&iv(1, 10), &CancellationToken::new())
            .unwrap();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(factory.connects(), 1);
    }

    #[test]
    fn test_protocol_failure_discards_session() {
        let factory = ScriptedFactory::new();
        factory.set_search_failures(true);
        let pool = pool(&factory);

        let err = BatchFetcher::new(&pool)
            .fetch(&iv(1, 10), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, FetchError::Protocol(_)));
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(factory.logouts(), 1);
    }

    #[test]
    fn test_no_session_is_connect_error() {
        let factory = ScriptedFactory::new();
        factory.set_connect_failures(true);
        let pool = pool(&factory);

        let err = BatchFetcher::new(&pool)
            .fetch(&iv(1, 10), &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_cancel_between_batches() {
        let factory = ScriptedFactory::new();
        seed(&factory, 9);
        let token = CancellationToken::new();
        factory.cancel_after_fetches(2, token.clone());
        let pool = pool(&factory);

        let err = BatchFetcher::new(&pool)
            .with_batch_size(3)
            .fetch(&iv(1, 10), &token)
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled { batches: 2 }));
        assert_eq!(factory.fetches(), 2);
        // Cancelled sessions are still healthy and go back to the pool
        assert_eq!(pool.idle_count(), 1);
    }
}
