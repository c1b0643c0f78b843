//! Mail cache - Incremental mirror of a remote mailbox's message metadata
//!
//! This crate provides:
//! - Closed time intervals and the canonical coverage set built from them
//! - Record and coverage stores (SQLite and in-memory) with atomic gap commits
//! - An IMAP session boundary, a bounded connection pool and a batch fetcher
//! - A search service that fetches only the uncovered parts of a window
//!
//! Everything is synchronous; concurrency comes from the connection pool and
//! rayon.

pub mod cancel;
pub mod config;
pub mod imap;
pub mod models;
pub mod search;
pub mod storage;

pub use cancel::CancellationToken;
pub use self::config::{CacheSettings, ImapSettings, Settings};
pub use self::imap::{
    BatchFetcher, ConnectError, ConnectionPool, FetchError, FetchOutcome, ImapSessionFactory,
    MailSession, PoolSettings, SessionFactory,
};
pub use models::{EmailRecord, Interval, InvalidInterval, MessageId};
pub use search::{
    InvalidPattern, ReconcileStats, SearchError, SearchOptions, SearchReport, SearchService,
    SenderPattern, lookback_days,
};
pub use storage::{
    CoverageSet, CoverageStore, InMemoryMailCache, MailCache, RecordStore, SqliteMailCache,
    TrimStats,
};
