//! IMAP sessions over TLS
//!
//! Uses the synchronous `imap` crate so sessions can be shared through the
//! blocking pool without an async runtime.

use std::net::TcpStream;

use log::debug;
use native_tls::{TlsConnector, TlsStream};

use super::session::{
    ConnectError, DateCriteria, HEADER_FIELDS, MailSession, ProtocolError, SessionFactory,
};
use crate::config::ImapSettings;

type TlsSession = imap::Session<TlsStream<TcpStream>>;

/// A logged-in session with the configured mailbox open read-only
pub struct ImapSession {
    inner: TlsSession,
}

impl MailSession for ImapSession {
    fn search(&mut self, criteria: &DateCriteria) -> Result<Vec<u32>, ProtocolError> {
        let query = criteria.to_imap_query();
        let uids = self
            .inner
            .uid_search(&query)
            .map_err(|e| ProtocolError::new("UID SEARCH", e.to_string()))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        debug!("{} matched {} messages", query, uids.len());
        Ok(uids)
    }

    fn fetch_headers(&mut self, ids: &[u32]) -> Result<Vec<(u32, Option<Vec<u8>>)>, ProtocolError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let uid_set = ids
            .iter()
            .map(|uid| uid.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches = self
            .inner
            .uid_fetch(&uid_set, format!("(UID {})", HEADER_FIELDS))
            .map_err(|e| ProtocolError::new("UID FETCH", e.to_string()))?;

        Ok(fetches
            .iter()
            .filter_map(|fetch| {
                let uid = fetch.uid?;
                let header = fetch.header().or_else(|| fetch.body()).map(<[u8]>::to_vec);
                Some((uid, header))
            })
            .collect())
    }

    fn noop(&mut self) -> Result<(), ProtocolError> {
        self.inner
            .noop()
            .map_err(|e| ProtocolError::new("NOOP", e.to_string()))
    }

    fn logout(&mut self) {
        if let Err(e) = self.inner.logout() {
            debug!("Logout failed: {}", e);
        }
    }
}

/// Opens TLS sessions against the configured server
pub struct ImapSessionFactory {
    settings: ImapSettings,
    tls: TlsConnector,
}

impl ImapSessionFactory {
    pub fn new(settings: ImapSettings) -> Result<Self, ConnectError> {
        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| ConnectError::Tls(e.to_string()))?;
        Ok(Self { settings, tls })
    }

    pub fn settings(&self) -> &ImapSettings {
        &self.settings
    }
}

impl SessionFactory for ImapSessionFactory {
    type Session = ImapSession;

    fn connect(&self) -> Result<ImapSession, ConnectError> {
        let s = &self.settings;
        let address = format!("{}:{}", s.host, s.port);

        let client = imap::connect((s.host.as_str(), s.port), s.host.as_str(), &self.tls)
            .map_err(|e| ConnectError::Connect {
                address: address.clone(),
                message: e.to_string(),
            })?;

        let mut inner = client
            .login(&s.username, &s.password)
            .map_err(|(e, _client)| ConnectError::Login {
                user: s.username.clone(),
                message: e.to_string(),
            })?;

        // EXAMINE opens the mailbox read-only so fetches never set \Seen
        if let Err(e) = inner.examine(&s.mailbox) {
            let _ = inner.logout();
            return Err(ConnectError::Select {
                mailbox: s.mailbox.clone(),
                message: e.to_string(),
            });
        }

        debug!("Opened {} on {}", s.mailbox, address);
        Ok(ImapSession { inner })
    }
}
