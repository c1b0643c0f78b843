//! Domain models for cached mail

mod email;
mod interval;

pub use email::{EmailRecord, MessageId, sort_newest_first};
pub use interval::{Interval, InvalidInterval, saturating_before};
