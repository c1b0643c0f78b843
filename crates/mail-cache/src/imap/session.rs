//! Protocol client boundary
//!
//! The fetcher and pool only see these traits. [`super::ImapSessionFactory`]
//! is the production implementation.

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::models::Interval;

/// Header fields requested for every message; the body is never fetched
pub const HEADER_FIELDS: &str = "BODY.PEEK[HEADER.FIELDS (MESSAGE-ID FROM SUBJECT DATE)]";

/// Error opening a session
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("could not connect to {address}: {message}")]
    Connect { address: String, message: String },
    #[error("login failed for {user}: {message}")]
    Login { user: String, message: String },
    #[error("could not open mailbox {mailbox}: {message}")]
    Select { mailbox: String, message: String },
}

/// Error from a command on an open session
#[derive(Debug, thiserror::Error)]
#[error("{command} failed: {message}")]
pub struct ProtocolError {
    pub command: &'static str,
    pub message: String,
}

impl ProtocolError {
    pub fn new(command: &'static str, message: impl Into<String>) -> Self {
        Self {
            command,
            message: message.into(),
        }
    }
}

/// Server-side date search bounds
///
/// The protocol searches by whole days and `BEFORE` is exclusive, so an
/// interval ending on day D searches `BEFORE D+1` to include all of day D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateCriteria {
    pub since: NaiveDate,
    pub before: NaiveDate,
}

impl DateCriteria {
    /// Bounds covering every day `interval` touches
    ///
    /// `since` never goes before 1 Jan 1970, the earliest date servers accept.
    pub fn for_interval(interval: &Interval) -> Self {
        let since = interval
            .start()
            .date_naive()
            .max(DateTime::<Utc>::UNIX_EPOCH.date_naive());
        let end = interval.end().date_naive().max(since);
        Self {
            since,
            before: end.checked_add_days(Days::new(1)).unwrap_or(end),
        }
    }

    /// Render as a search query, e.g. `SINCE 1-Jan-2024 BEFORE 11-Jan-2024`
    pub fn to_imap_query(&self) -> String {
        format!(
            "SINCE {} BEFORE {}",
            self.since.format("%-d-%b-%Y"),
            self.before.format("%-d-%b-%Y")
        )
    }
}

/// One authenticated, mailbox-selected connection
pub trait MailSession: Send {
    /// Identifiers of messages matching the date criteria
    fn search(&mut self, criteria: &DateCriteria) -> Result<Vec<u32>, ProtocolError>;

    /// Raw header bytes for each requested id
    ///
    /// Ids the server returned nothing for come back as `None` or are left
    /// out of the result entirely.
    fn fetch_headers(&mut self, ids: &[u32]) -> Result<Vec<(u32, Option<Vec<u8>>)>, ProtocolError>;

    /// Cheap liveness probe
    fn noop(&mut self) -> Result<(), ProtocolError>;

    /// Close the connection, ignoring errors
    fn logout(&mut self);
}

/// Opens new sessions for the pool
pub trait SessionFactory: Send + Sync {
    type Session: MailSession;

    fn connect(&self) -> Result<Self::Session, ConnectError>;
}
