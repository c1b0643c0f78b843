//! Cached email metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message (the `Message-ID` header value)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Metadata for one fetched message
///
/// Records are keyed by `message_id`; storing a record with an id that is
/// already cached replaces the earlier copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub message_id: MessageId,
    /// Decoded `From` header, e.g. `Jane Doe <jane@example.com>`
    pub from_address: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    /// Web-client link for opening the message, when one could be derived
    pub deep_link: Option<String>,
}

impl EmailRecord {
    pub fn new(
        message_id: impl Into<MessageId>,
        from_address: impl Into<String>,
        subject: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            from_address: from_address.into(),
            subject: subject.into(),
            date,
            deep_link: None,
        }
    }

    pub fn with_deep_link(mut self, deep_link: Option<String>) -> Self {
        self.deep_link = deep_link;
        self
    }
}

/// Sort records newest first, breaking ties by message id for stable output
pub fn sort_newest_first(records: &mut [EmailRecord]) {
    records.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_sort_newest_first() {
        let now = Utc::now();
        let mut records = vec![
            EmailRecord::new("<a@x>", "a@x", "old", now - Duration::days(2)),
            EmailRecord::new("<b@x>", "b@x", "new", now),
            EmailRecord::new("<c@x>", "c@x", "mid", now - Duration::days(1)),
        ];

        sort_newest_first(&mut records);

        let subjects: Vec<_> = records.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, ["new", "mid", "old"]);
    }

    #[test]
    fn test_serialization() {
        let record = EmailRecord::new("<id@example.com>", "x@example.com", "Hi", Utc::now())
            .with_deep_link(Some("https://example.com".to_string()));
        let json = serde_json::to_string(&record).unwrap();
        let back: EmailRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
