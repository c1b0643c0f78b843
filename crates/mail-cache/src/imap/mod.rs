//! Mail server access
//!
//! This module provides:
//! - The session boundary the rest of the crate programs against
//! - A TLS IMAP implementation of that boundary
//! - A bounded connection pool
//! - Batched, failure-tolerant header fetching
//! - Header decoding into cached records

mod client;
mod decode;
mod fetcher;
mod pool;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ImapSession, ImapSessionFactory};
pub use decode::{
    DEFAULT_DEEP_LINK_BASE, DecodeError, DeepLinkTemplate, HeaderFields, NO_SUBJECT,
    decode_headers, decode_record,
};
pub use fetcher::{BatchFetcher, DEFAULT_BATCH_SIZE, FetchError, FetchOutcome};
pub use pool::{ConnectionPool, PoolSettings, PooledSession};
pub use session::{
    ConnectError, DateCriteria, HEADER_FIELDS, MailSession, ProtocolError, SessionFactory,
};
