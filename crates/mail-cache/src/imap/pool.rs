//! Bounded pool of protocol sessions
//!
//! Idle sessions sit in a bounded channel. Checkout waits briefly for an
//! idle session and otherwise opens a new one; checkin waits briefly for room
//! and otherwise logs the session out. The pool speeds things up and never
//! turns a caller away just because it is empty or full.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info, warn};

use super::session::{ConnectError, MailSession, SessionFactory};

/// Pool sizing and timeouts
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Sessions kept idle at steady state
    pub workers: usize,
    /// How long checkout waits for an idle session before opening one
    pub checkout_timeout: Duration,
    /// How long checkin waits for room before discarding the session
    pub checkin_timeout: Duration,
    /// Send NOOP to idle sessions on checkout and replace stale ones
    pub probe_idle: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            checkout_timeout: Duration::from_secs(5),
            checkin_timeout: Duration::from_secs(5),
            probe_idle: true,
        }
    }
}

pub struct ConnectionPool<F: SessionFactory> {
    factory: F,
    settings: PoolSettings,
    idle_tx: Sender<F::Session>,
    idle_rx: Receiver<F::Session>,
    closed: AtomicBool,
}

impl<F: SessionFactory> ConnectionPool<F> {
    /// Create the pool and open up to `workers` sessions up front
    ///
    /// Sessions that fail to open are logged and skipped; the pool refills
    /// lazily as checkouts open replacements.
    pub fn new(factory: F, settings: PoolSettings) -> Self {
        let pool = Self::empty(factory, settings);

        let mut opened = 0;
        for _ in 0..pool.capacity() {
            match pool.factory.connect() {
                Ok(session) => {
                    if pool.idle_tx.try_send(session).is_ok() {
                        opened += 1;
                    }
                }
                Err(e) => warn!("Failed to open pooled session: {}", e),
            }
        }
        info!("Connection pool ready with {}/{} sessions", opened, pool.capacity());

        pool
    }

    /// Create the pool without opening any sessions
    pub fn empty(factory: F, settings: PoolSettings) -> Self {
        let capacity = settings.workers.max(1);
        let (idle_tx, idle_rx) = bounded(capacity);
        Self {
            factory,
            settings,
            idle_tx,
            idle_rx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.settings.workers.max(1)
    }

    pub fn idle_count(&self) -> usize {
        self.idle_rx.len()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Take a session, opening a fresh one if none frees up in time
    pub fn checkout(&self) -> Result<PooledSession<'_, F>, ConnectError> {
        let session = match self.idle_rx.recv_timeout(self.settings.checkout_timeout) {
            Ok(session) => self.probe(session)?,
            Err(_) => {
                debug!(
                    "No idle session within {:?}, opening a new one",
                    self.settings.checkout_timeout
                );
                self.create_session()?
            }
        };

        Ok(PooledSession {
            pool: self,
            session: Some(session),
        })
    }

    /// Open a new session outside the pool
    pub fn create_session(&self) -> Result<F::Session, ConnectError> {
        self.factory.connect().inspect_err(|e| {
            warn!("Failed to open session: {}", e);
        })
    }

    /// Return a session, logging it out if the pool is full or shut down
    pub fn checkin(&self, mut session: F::Session) {
        if self.closed.load(Ordering::Acquire) {
            session.logout();
            return;
        }

        if let Err(e) = self
            .idle_tx
            .send_timeout(session, self.settings.checkin_timeout)
        {
            debug!("Pool full, closing returned session");
            e.into_inner().logout();
        }
    }

    /// Log out every idle session
    ///
    /// Sessions checked out at this point are not reclaimed; they are logged
    /// out when their holders return them.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let mut closed = 0;
        while let Ok(mut session) = self.idle_rx.try_recv() {
            session.logout();
            closed += 1;
        }
        if closed > 0 {
            info!("Closed {} pooled sessions", closed);
        }
    }

    fn probe(&self, mut session: F::Session) -> Result<F::Session, ConnectError> {
        if !self.settings.probe_idle {
            return Ok(session);
        }
        match session.noop() {
            Ok(()) => Ok(session),
            Err(e) => {
                warn!("Pooled session is stale ({}), opening a new one", e);
                session.logout();
                self.create_session()
            }
        }
    }
}

impl<F: SessionFactory> Drop for ConnectionPool<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A checked-out session, returned to its pool when dropped
pub struct PooledSession<'a, F: SessionFactory> {
    pool: &'a ConnectionPool<F>,
    session: Option<F::Session>,
}

impl<F: SessionFactory> PooledSession<'_, F> {
    /// Log the session out instead of returning it to the pool
    pub fn discard(mut self) {
        if let Some(mut session) = self.session.take() {
            session.logout();
        }
    }
}

impl<F: SessionFactory> Deref for PooledSession<'_, F> {
    type Target = F::Session;

    fn deref(&self) -> &F::Session {
        // Only `discard` and `drop` take the session, both consuming the guard
        self.session.as_ref().expect("pooled session already released")
    }
}

impl<F: SessionFactory> DerefMut for PooledSession<'_, F> {
    fn deref_mut(&mut self) -> &mut F::Session {
        self.session.as_mut().expect("pooled session already released")
    }
}

impl<F: SessionFactory> Drop for PooledSession<'_, F> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.checkin(session);
        }
    }
}
