//! Sender search
//!
//! [`SenderPattern`] validates the query up front. [`SearchService`] closes
//! the cache's gaps in the requested window and answers from the cache.

mod pattern;
mod service;

pub use pattern::{InvalidPattern, SenderPattern};
pub use service::{
    DEFAULT_LOOKBACK_DAYS, ReconcileStats, SearchError, SearchOptions, SearchReport,
    SearchService, lookback_days,
};
