//! Scripted in-process mail server for tests
//!
//! [`ScriptedFactory`] hands out sessions backed by a shared, canned
//! mailbox. Tests can drop headers for specific messages, make connects,
//! probes or searches fail, and count every round trip.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::session::{ConnectError, DateCriteria, MailSession, ProtocolError, SessionFactory};
use crate::cancel::CancellationToken;

struct ScriptedMessage {
    uid: u32,
    date: DateTime<Utc>,
    raw: Vec<u8>,
}

#[derive(Default)]
struct Shared {
    messages: Mutex<Vec<ScriptedMessage>>,
    dropped: Mutex<HashSet<u32>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    fail_connect: AtomicBool,
    fail_noop: AtomicBool,
    fail_search: AtomicBool,
    connects: AtomicUsize,
    logouts: AtomicUsize,
    searches: AtomicUsize,
    fetches: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct ScriptedFactory {
    shared: Arc<Shared>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message with arbitrary raw header bytes
    pub fn add_raw(&self, uid: u32, date: DateTime<Utc>, raw: impl Into<Vec<u8>>) {
        if let Ok(mut messages) = self.shared.messages.lock() {
            messages.push(ScriptedMessage {
                uid,
                date,
                raw: raw.into(),
            });
        }
    }

    /// Add a well-formed message
    pub fn add_email(&self, uid: u32, message_id: &str, from: &str, subject: &str, date: DateTime<Utc>) {
        let raw = format!(
            "Message-ID: {}\r\nFrom: {}\r\nSubject: {}\r\nDate: {}\r\n\r\n",
            message_id,
            from,
            subject,
            date.to_rfc2822()
        );
        self.add_raw(uid, date, raw);
    }

    /// Make the server return no header bytes for `uid`
    pub fn drop_headers(&self, uid: u32) {
        if let Ok(mut dropped) = self.shared.dropped.lock() {
            dropped.insert(uid);
        }
    }

    /// Cancel `token` once `fetches` header fetches have completed
    pub fn cancel_after_fetches(&self, fetches: usize, token: CancellationToken) {
        if let Ok(mut slot) = self.shared.cancel_after.lock() {
            *slot = Some((fetches, token));
        }
    }

    pub fn set_connect_failures(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_noop_failures(&self, fail: bool) {
        self.shared.fail_noop.store(fail, Ordering::SeqCst);
    }

    pub fn set_search_failures(&self, fail: bool) {
        self.shared.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.shared.logouts.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.shared.searches.load(Ordering::SeqCst)
    }

    /// Number of header fetch round trips
    pub fn fetches(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }
}

impl SessionFactory for ScriptedFactory {
    type Session = ScriptedSession;

    fn connect(&self) -> Result<ScriptedSession, ConnectError> {
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectError::Connect {
                address: "scripted:993".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            shared: Arc::clone(&self.shared),
            in_use: AtomicBool::new(false),
        })
    }
}

pub struct ScriptedSession {
    shared: Arc<Shared>,
    in_use: AtomicBool,
}

impl ScriptedSession {
    /// Mark the session busy; false if another caller already holds it
    pub fn claim(&self) -> bool {
        !self.in_use.swap(true, Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

impl MailSession for ScriptedSession {
    fn search(&mut self, criteria: &DateCriteria) -> Result<Vec<u32>, ProtocolError> {
        self.shared.searches.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_search.load(Ordering::SeqCst) {
            return Err(ProtocolError::new("UID SEARCH", "server said BAD"));
        }

        let messages = self
            .shared
            .messages
            .lock()
            .map_err(|_| ProtocolError::new("UID SEARCH", "mailbox lock poisoned"))?;
        let mut uids: Vec<u32> = messages
            .iter()
            .filter(|m| {
                let day = m.date.date_naive();
                criteria.since <= day && day < criteria.before
            })
            .map(|m| m.uid)
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch_headers(&mut self, ids: &[u32]) -> Result<Vec<(u32, Option<Vec<u8>>)>, ProtocolError> {
        let done = self.shared.fetches.fetch_add(1, Ordering::SeqCst) + 1;

        let result: Vec<(u32, Option<Vec<u8>>)> = {
            let messages = self
                .shared
                .messages
                .lock()
                .map_err(|_| ProtocolError::new("UID FETCH", "mailbox lock poisoned"))?;
            let dropped = self
                .shared
                .dropped
                .lock()
                .map_err(|_| ProtocolError::new("UID FETCH", "mailbox lock poisoned"))?;

            ids.iter()
                .filter_map(|id| {
                    let message = messages.iter().find(|m| m.uid == *id)?;
                    let raw = (!dropped.contains(id)).then(|| message.raw.clone());
                    Some((*id, raw))
                })
                .collect()
        };

        if let Ok(slot) = self.shared.cancel_after.lock()
            && let Some((after, token)) = slot.as_ref()
            && done >= *after
        {
            token.cancel();
        }

        Ok(result)
    }

    fn noop(&mut self) -> Result<(), ProtocolError> {
        if self.shared.fail_noop.load(Ordering::SeqCst) {
            return Err(ProtocolError::new("NOOP", "connection reset"));
        }
        Ok(())
    }

    fn logout(&mut self) {
        self.shared.logouts.fetch_add(1, Ordering::SeqCst);
    }
}
