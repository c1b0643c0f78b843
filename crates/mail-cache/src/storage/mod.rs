//! Storage traits and implementations
//!
//! Two logical stores live side by side: coverage (which time ranges have
//! been fully fetched) and records (what was found). The [`MailCache`] trait
//! updates both in one unit of work. SQLite is the persistent backend; the
//! in-memory backend mirrors its semantics for tests.

mod coverage;
mod memory;
mod sqlite;
mod traits;

pub use coverage::CoverageSet;
pub use memory::InMemoryMailCache;
pub use sqlite::SqliteMailCache;
pub use traits::{CoverageStore, MailCache, RecordStore, TrimStats};
