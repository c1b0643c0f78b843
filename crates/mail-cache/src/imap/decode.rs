//! Header decoding
//!
//! Turns the raw header block returned by a fetch into an [`EmailRecord`].
//! Field-level decoding (RFC 2047 encoded words, RFC 2822 dates) is done
//! by `mailparse`.

use chrono::{DateTime, Utc};
use mailparse::MailHeaderMap;

use crate::models::{EmailRecord, MessageId};

/// Subject stored for messages without one
pub const NO_SUBJECT: &str = "(no subject)";

/// Web search URL prefix; the quoted, percent-encoded subject is appended
pub const DEFAULT_DEEP_LINK_BASE: &str = "https://mail.google.com/mail/u/0/#search/subject%3A";

/// Why a message was left out of a fetch result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("no headers returned")]
    Missing,
    #[error("malformed header block: {0}")]
    Malformed(String),
    #[error("missing Message-ID")]
    MissingMessageId,
    #[error("missing From")]
    MissingSender,
}

/// Best-effort decoded header values
///
/// Blank values are reported as absent. `date` falls back to the time of
/// decoding when the header is missing or unparseable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFields {
    pub message_id: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub date: DateTime<Utc>,
}

/// Decode the header block of one message
pub fn decode_headers(raw: &[u8]) -> Result<HeaderFields, DecodeError> {
    let (headers, _) =
        mailparse::parse_headers(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let field = |name: &str| {
        headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let date = field("Date")
        .and_then(|v| mailparse::dateparse(&v).ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    Ok(HeaderFields {
        message_id: field("Message-ID"),
        from: field("From"),
        subject: field("Subject"),
        date,
    })
}

/// Builds mail-client links from a message subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkTemplate {
    base: String,
}

impl Default for DeepLinkTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_DEEP_LINK_BASE)
    }
}

impl DeepLinkTemplate {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Link searching for the exact subject, or `None` without one
    pub fn link_for(&self, subject: Option<&str>) -> Option<String> {
        let subject = subject.map(str::trim).filter(|s| !s.is_empty())?;
        let quoted = format!("\"{}\"", subject);
        Some(format!("{}{}", self.base, urlencoding::encode(&quoted)))
    }
}

impl HeaderFields {
    /// Accept the message only if its id and sender decoded
    pub fn into_record(self, links: &DeepLinkTemplate) -> Result<EmailRecord, DecodeError> {
        let message_id = self.message_id.ok_or(DecodeError::MissingMessageId)?;
        let from_address = self.from.ok_or(DecodeError::MissingSender)?;
        let deep_link = links.link_for(self.subject.as_deref());
        let subject = self.subject.unwrap_or_else(|| NO_SUBJECT.to_string());

        Ok(EmailRecord {
            message_id: MessageId::new(message_id),
            from_address,
            subject,
            date: self.date,
            deep_link,
        })
    }
}

/// Decode one fetched message, `None` meaning the server returned no headers
pub fn decode_record(
    raw: Option<&[u8]>,
    links: &DeepLinkTemplate,
) -> Result<EmailRecord, DecodeError> {
    let raw = raw.ok_or(DecodeError::Missing)?;
    decode_headers(raw)?.into_record(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FULL: &[u8] = b"Message-ID: <abc@example.com>\r\n\
From: =?UTF-8?B?SsO2cmc=?= <jorg@example.com>\r\n\
Subject: Quarterly report\r\n\
Date: Tue, 2 Jan 2024 10:30:00 +0100\r\n\r\n";

    #[test]
    fn test_decode_full_headers() {
        let fields = decode_headers(FULL).unwrap();
        assert_eq!(fields.message_id.as_deref(), Some("<abc@example.com>"));
        assert_eq!(fields.from.as_deref(), Some("Jörg <jorg@example.com>"));
        assert_eq!(fields.subject.as_deref(), Some("Quarterly report"));
        assert_eq!(
            fields.date,
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_unparseable_date_defaults_to_now() {
        let before = Utc::now();
        let raw = b"Message-ID: <x@y>\r\nFrom: a@b\r\nDate: not a date\r\n\r\n";
        let fields = decode_headers(raw).unwrap();
        assert!(fields.date >= before);
    }

    #[test]
    fn test_missing_subject_gets_default_and_no_link() {
        let raw = b"Message-ID: <x@y>\r\nFrom: a@b\r\n\r\n";
        let record = decode_record(Some(raw), &DeepLinkTemplate::default()).unwrap();
        assert_eq!(record.subject, NO_SUBJECT);
        assert_eq!(record.deep_link, None);
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        let links = DeepLinkTemplate::default();
        let no_id = b"From: a@b\r\nSubject: hi\r\n\r\n";
        assert_eq!(
            decode_record(Some(no_id), &links),
            Err(DecodeError::MissingMessageId)
        );

        let no_from = b"Message-ID: <x@y>\r\nFrom:   \r\n\r\n";
        assert_eq!(
            decode_record(Some(no_from), &links),
            Err(DecodeError::MissingSender)
        );

        assert_eq!(decode_record(None, &links), Err(DecodeError::Missing));
    }

    #[test]
    fn test_deep_link_quotes_and_encodes_subject() {
        let links = DeepLinkTemplate::default();
        assert_eq!(
            links.link_for(Some("Hello world")).unwrap(),
            "https://mail.google.com/mail/u/0/#search/subject%3A%22Hello%20world%22"
        );
        assert_eq!(links.link_for(Some("   ")), None);
        assert_eq!(links.link_for(None), None);

        let custom = DeepLinkTemplate::new("https://mail.example.com/search?q=");
        assert_eq!(
            custom.link_for(Some("a&b")).unwrap(),
            "https://mail.example.com/search?q=%22a%26b%22"
        );
    }
}
