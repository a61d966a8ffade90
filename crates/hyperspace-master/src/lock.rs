//! Per-node SHARED/EXCLUSIVE locks with FIFO waiter queues.
//!
//! Lock requests never block: a request is either granted on the spot or
//! appended to the node's queue, and the caller learns about a later grant
//! through a LOCK_ACQUIRED event. Waiters are served strictly in arrival
//! order, so a SHARED request never overtakes an earlier EXCLUSIVE one.

use std::collections::{HashMap, VecDeque};

use crate::types::{HandleId, HyperspaceError, LockMode, LockStatus, NodeId, Result, SessionId};

/// A (session, handle) pair currently holding a lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Holder {
    /// Owning session.
    pub session: SessionId,
    /// Handle through which the lock is held.
    pub handle: HandleId,
}

/// A queued lock request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Waiter {
    /// Owning session.
    pub session: SessionId,
    /// Handle that asked for the lock.
    pub handle: HandleId,
    /// Requested mode.
    pub mode: LockMode,
}

/// A waiter promoted to holder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    /// Node whose lock was granted.
    pub node: NodeId,
    /// Owning session.
    pub session: SessionId,
    /// Handle that now holds the lock.
    pub handle: HandleId,
    /// Granted mode.
    pub mode: LockMode,
}

/// Lock state of a single node.
#[derive(Clone, Debug)]
pub struct LockState {
    mode: LockMode,
    holders: Vec<Holder>,
    pending: VecDeque<Waiter>,
    generation: u64,
}

impl Default for LockState {
    fn default() -> Self {
        Self {
            mode: LockMode::None,
            holders: Vec::new(),
            pending: VecDeque::new(),
            generation: 0,
        }
    }
}

impl LockState {
    /// Current mode.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Current holders in grant order.
    pub fn holders(&self) -> &[Holder] {
        &self.holders
    }

    /// Queued requests in arrival order.
    pub fn pending(&self) -> impl Iterator<Item = &Waiter> {
        self.pending.iter()
    }

    /// Number of EXCLUSIVE grants made on this node so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn involves(&self, handle: HandleId) -> bool {
        self.holders.iter().any(|h| h.handle == handle)
            || self.pending.iter().any(|w| w.handle == handle)
    }

    fn grant(&mut self, session: SessionId, handle: HandleId, mode: LockMode) {
        if mode == LockMode::Exclusive {
            self.generation += 1;
        }
        self.mode = mode;
        self.holders.push(Holder { session, handle });
    }

    fn grantable(&self, mode: LockMode) -> bool {
        match self.mode {
            LockMode::None => true,
            LockMode::Shared => mode == LockMode::Shared && self.pending.is_empty(),
            LockMode::Exclusive => false,
        }
    }

    fn check(&self, node: NodeId) -> Result<()> {
        let corrupt = |what: &str| Err(HyperspaceError::Corrupted(format!("node {}: {}", node, what)));
        match self.mode {
            LockMode::None if !self.holders.is_empty() => return corrupt("holders without mode"),
            LockMode::Shared if self.holders.is_empty() => return corrupt("shared mode without holders"),
            LockMode::Exclusive if self.holders.len() != 1 => {
                return corrupt("exclusive lock without exactly one holder")
            }
            _ => {}
        }
        if self.holders.is_empty() && !self.pending.is_empty() {
            return corrupt("waiters queued on an unheld lock");
        }
        let mut seen: Vec<HandleId> = self
            .holders
            .iter()
            .map(|h| h.handle)
            .chain(self.pending.iter().map(|w| w.handle))
            .collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        if seen.len() != total {
            return corrupt("handle appears twice");
        }
        Ok(())
    }
}

/// Lock table keyed by node, created lazily on first request.
#[derive(Default)]
pub struct LockTable {
    locks: HashMap<NodeId, LockState>,
}

impl LockTable {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock state of a node, if a lock was ever requested on it.
    pub fn get(&self, node: NodeId) -> Option<&LockState> {
        self.locks.get(&node)
    }

    /// Returns true if anyone holds the node's lock.
    pub fn is_held(&self, node: NodeId) -> bool {
        self.locks
            .get(&node)
            .is_some_and(|l| !l.holders.is_empty())
    }

    /// Returns true if `handle` currently holds the node's lock.
    pub fn is_holder(&self, node: NodeId, handle: HandleId) -> bool {
        self.locks
            .get(&node)
            .is_some_and(|l| l.holders.iter().any(|h| h.handle == handle))
    }

    /// Grants the lock or appends the request to the FIFO queue.
    pub fn try_acquire(
        &mut self,
        node: NodeId,
        session: SessionId,
        handle: HandleId,
        mode: LockMode,
    ) -> Result<LockStatus> {
        if mode == LockMode::None {
            return Err(HyperspaceError::InvalidLockMode(mode));
        }
        let state = self.locks.entry(node).or_default();
        if state.involves(handle) {
            return Err(HyperspaceError::AlreadyHolding(handle));
        }
        if state.grantable(mode) {
            state.grant(session, handle, mode);
            return Ok(LockStatus::Granted {
                generation: state.generation,
            });
        }
        state.pending.push_back(Waiter {
            session,
            handle,
            mode,
        });
        Ok(LockStatus::Queued)
    }

    /// Grants the lock if possible right now, otherwise fails with `Busy`
    /// without queueing.
    pub fn try_lock(
        &mut self,
        node: NodeId,
        session: SessionId,
        handle: HandleId,
        mode: LockMode,
    ) -> Result<u64> {
        if mode == LockMode::None {
            return Err(HyperspaceError::InvalidLockMode(mode));
        }
        let state = self.locks.entry(node).or_default();
        if state.involves(handle) {
            return Err(HyperspaceError::AlreadyHolding(handle));
        }
        if !state.grantable(mode) {
            return Err(HyperspaceError::Busy);
        }
        state.grant(session, handle, mode);
        Ok(state.generation)
    }

    /// Removes `handle` from the holders without promoting anyone.
    ///
    /// Callers run [`LockTable::promote`] afterwards; splitting the two lets
    /// session teardown emit every release before any promotion.
    pub fn release(&mut self, node: NodeId, handle: HandleId) -> Result<Holder> {
        let state = self
            .locks
            .get_mut(&node)
            .ok_or(HyperspaceError::NotLockHolder(handle))?;
        let pos = state
            .holders
            .iter()
            .position(|h| h.handle == handle)
            .ok_or(HyperspaceError::NotLockHolder(handle))?;
        let holder = state.holders.remove(pos);
        if state.holders.is_empty() {
            state.mode = LockMode::None;
        }
        Ok(holder)
    }

    /// Withdraws a queued request. Returns None if `handle` was not queued.
    pub fn dequeue(&mut self, node: NodeId, handle: HandleId) -> Option<Waiter> {
        let state = self.locks.get_mut(&node)?;
        let pos = state.pending.iter().position(|w| w.handle == handle)?;
        state.pending.remove(pos)
    }

    /// Promotes waiters from the head of the queue while they are compatible
    /// with the current holders.
    ///
    /// An EXCLUSIVE head is promoted alone and only onto an unheld lock; a
    /// run of SHARED heads is promoted together, stopping at the first
    /// EXCLUSIVE request.
    pub fn promote(&mut self, node: NodeId) -> Vec<Grant> {
        let mut grants = Vec::new();
        let Some(state) = self.locks.get_mut(&node) else {
            return grants;
        };
        while let Some(head) = state.pending.front().copied() {
            let fits = match (state.mode, head.mode) {
                (LockMode::None, _) => true,
                (LockMode::Shared, LockMode::Shared) => true,
                _ => false,
            };
            if !fits {
                break;
            }
            state.pending.pop_front();
            state.grant(head.session, head.handle, head.mode);
            grants.push(Grant {
                node,
                session: head.session,
                handle: head.handle,
                mode: head.mode,
            });
            if head.mode == LockMode::Exclusive {
                break;
            }
        }
        grants
    }

    /// Drops all lock state for a deleted node.
    pub fn remove_node(&mut self, node: NodeId) -> Option<LockState> {
        self.locks.remove(&node)
    }

    /// Verifies the lock invariants of one node.
    pub fn check_invariants(&self, node: NodeId) -> Result<()> {
        match self.locks.get(&node) {
            Some(state) => state.check(node),
            None => Ok(()),
        }
    }

    /// Verifies the lock invariants of every node.
    pub fn check_all(&self) -> Result<()> {
        self.locks.iter().try_for_each(|(node, state)| state.check(*node))
    }
}
