//! Client sessions and their leases.
//!
//! A session stays CONNECTED while the client keeps contacting the master.
//! Once the lease lapses it enters JEOPARDY for the grace period, during
//! which any successful request restores it to CONNECTED; after that it is
//! EXPIRED and the master tears down its handles and locks.
//!
//! Last-contact times and states are atomics so read-only requests, which
//! run under a shared lock on the master state, can still refresh the lease.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::types::*;

/// Lifecycle state of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Lease is current.
    Connected = 0,
    /// Lease lapsed; inside the grace period.
    Jeopardy = 1,
    /// Terminal; the session is being or has been destroyed.
    Expired = 2,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Connected,
            1 => SessionState::Jeopardy,
            _ => SessionState::Expired,
        }
    }
}

/// Lease timing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeaseConfig {
    /// How long a contact keeps the session CONNECTED.
    pub lease_interval: Duration,
    /// How long a lapsed session stays in JEOPARDY before expiring.
    pub grace_period: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_interval: Duration::from_secs(12),
            grace_period: Duration::from_secs(30),
        }
    }
}

/// A client session.
#[derive(Debug)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Handles owned by the session.
    pub handles: BTreeSet<HandleId>,
    /// Locks held, as (node, handle) pairs.
    pub locks: BTreeSet<(NodeId, HandleId)>,
    state: AtomicU8,
    last_contact_ms: AtomicU64,
}

impl Session {
    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Moves JEOPARDY to CONNECTED; returns true if it did.
    fn reconnect(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Jeopardy as u8,
                SessionState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// All live sessions.
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    next_id: u64,
    epoch: Instant,
    lease: LeaseConfig,
}

impl SessionTable {
    /// Creates an empty table; lease times are measured from `epoch`.
    pub fn new(lease: LeaseConfig, epoch: Instant) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
            epoch,
            lease,
        }
    }

    /// Lease timing in effect.
    pub fn lease(&self) -> LeaseConfig {
        self.lease
    }

    fn millis(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn deadline_of(&self, session: &Session) -> Instant {
        self.epoch
            + Duration::from_millis(session.last_contact_ms.load(Ordering::Acquire))
            + self.lease.lease_interval
    }

    /// Opens a new CONNECTED session; returns its id and lease deadline.
    pub fn create(&mut self, now: Instant) -> (SessionId, Instant) {
        let id = SessionId::new(self.next_id);
        self.next_id += 1;
        let session = Session {
            id,
            handles: BTreeSet::new(),
            locks: BTreeSet::new(),
            state: AtomicU8::new(SessionState::Connected as u8),
            last_contact_ms: AtomicU64::new(self.millis(now)),
        };
        let deadline = self.deadline_of(&session);
        self.sessions.insert(id, session);
        (id, deadline)
    }

    /// Records contact from a live session, bringing it out of JEOPARDY.
    pub fn touch(&self, id: SessionId, now: Instant) -> Result<()> {
        let session = self.live(id)?;
        session
            .last_contact_ms
            .fetch_max(self.millis(now), Ordering::AcqRel);
        if session.reconnect() {
            info!(session = %id, "session left jeopardy");
        }
        Ok(())
    }

    /// Keepalive: records contact, leaves JEOPARDY, returns the new deadline.
    pub fn renew(&self, id: SessionId, now: Instant) -> Result<Instant> {
        self.touch(id, now)?;
        self.lease_deadline(id)
    }

    /// Current lease deadline of a session.
    pub fn lease_deadline(&self, id: SessionId) -> Result<Instant> {
        Ok(self.deadline_of(self.live(id)?))
    }

    /// Advances every session's state to `now`.
    ///
    /// Returns the sessions that just became EXPIRED; the caller destroys them.
    pub fn tick(&mut self, now: Instant) -> Vec<SessionId> {
        let lease = self.lease;
        let mut expired = Vec::new();
        for session in self.sessions.values() {
            let id = session.id;
            let deadline = self.deadline_of(session);
            match session.state() {
                SessionState::Expired => {}
                _ if now < deadline => {
                    if session.reconnect() {
                        info!(session = %id, "session left jeopardy");
                    }
                }
                state if now < deadline + lease.grace_period => {
                    if state == SessionState::Connected {
                        warn!(session = %id, "session lease lapsed, entering jeopardy");
                        session.set_state(SessionState::Jeopardy);
                    }
                }
                _ => {
                    warn!(session = %id, "session grace period elapsed");
                    session.set_state(SessionState::Expired);
                    expired.push(id);
                }
            }
        }
        expired.sort();
        expired
    }

    /// Marks a session EXPIRED ahead of its destruction.
    pub fn expire(&mut self, id: SessionId) -> Result<()> {
        self.live(id)?.set_state(SessionState::Expired);
        Ok(())
    }

    /// Removes a session from the table.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// A session that is not EXPIRED.
    pub fn live(&self, id: SessionId) -> Result<&Session> {
        self.sessions
            .get(&id)
            .filter(|s| s.state() != SessionState::Expired)
            .ok_or(HyperspaceError::NoSuchSession(id))
    }

    /// Session by id, in any state.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Mutable session by id, in any state.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Lifecycle state of a session.
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(Session::state)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
