//! The master: single serialization point over the namespace, lock, session
//! and handle tables.
//!
//! Every mutating operation runs under one write lock on the master state and
//! collects its events in an outbox, which is handed to the [`Dispatcher`]
//! before the lock is released. Enqueue order therefore matches commit order
//! and no reader ever sees a half-applied multi-table change. Read-only
//! operations share a read lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::dispatcher::{DispatchStats, Dispatcher, Event, EventSink, Notification};
use crate::handle::HandleTable;
use crate::kvstore::KvStore;
use crate::lock::{Holder, LockTable, Waiter};
use crate::namespace::{record_key, NamespaceTree, Node, NodeRecord};
use crate::session::{LeaseConfig, SessionState, SessionTable};
use crate::types::*;

/// Snapshot of a node's lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockInfo {
    /// Current mode.
    pub mode: LockMode,
    /// Number of EXCLUSIVE grants so far.
    pub generation: u64,
    /// Holders in grant order.
    pub holders: Vec<Holder>,
    /// Waiters in arrival order.
    pub waiters: Vec<Waiter>,
}

/// Table sizes, for health checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MasterStatus {
    /// Nodes including the root.
    pub nodes: usize,
    /// Live sessions.
    pub sessions: usize,
    /// Open handles.
    pub handles: usize,
}

enum Outgoing {
    Deliver(Event, Arc<dyn EventSink>),
    Retire(HandleId),
}

#[derive(Default)]
struct Outbox {
    items: Vec<Outgoing>,
}

impl Outbox {
    fn retire(&mut self, handle: HandleId) {
        self.items.push(Outgoing::Retire(handle));
    }
}

struct MasterState {
    tree: NamespaceTree,
    locks: LockTable,
    sessions: SessionTable,
    handles: HandleTable,
    kv: Arc<dyn KvStore>,
}

impl MasterState {
    /// Resolves a handle owned by `caller` and refreshes the caller's lease.
    fn session_of(
        &self,
        handle: HandleId,
        caller: SessionId,
        now: Instant,
    ) -> Result<(SessionId, NodeId)> {
        self.sessions.touch(caller, now)?;
        let h = self.handles.get(handle)?;
        if h.session != caller {
            return Err(HyperspaceError::BadHandle(handle));
        }
        Ok((h.session, h.node))
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.tree
            .get(id)
            .ok_or_else(|| HyperspaceError::Corrupted(format!("handle refers to missing node {}", id)))
    }

    fn emit(&self, handle: HandleId, notification: Notification, out: &mut Outbox) {
        if let Ok(h) = self.handles.get(handle) {
            if h.mask.contains(notification.mask()) {
                out.items.push(Outgoing::Deliver(
                    Event {
                        handle,
                        node: h.node,
                        notification,
                    },
                    h.sink.clone(),
                ));
            }
        }
    }

    fn emit_to_subscribers(&self, node: NodeId, notification: Notification, out: &mut Outbox) {
        if let Some(n) = self.tree.get(node) {
            for handle in &n.handles {
                self.emit(*handle, notification.clone(), out);
            }
        }
    }

    /// Writes the node's record with `change` applied, ahead of the in-memory change.
    fn persist_with(&self, node: NodeId, change: impl FnOnce(&mut NodeRecord)) -> Result<()> {
        if let Some(mut record) = self.tree.record_of(node) {
            change(&mut record);
            let path = &self.node(node)?.path;
            self.kv.put(record_key(path), record.encode()?)?;
        }
        Ok(())
    }

    fn create_node(
        &mut self,
        path: &str,
        is_dir: bool,
        ephemeral: bool,
        out: &mut Outbox,
    ) -> Result<NodeId> {
        self.tree.check_create(path)?;
        if !ephemeral {
            let record = NodeRecord {
                is_dir,
                attrs: BTreeMap::new(),
            };
            self.kv.put(record_key(path), record.encode()?)?;
        }
        let id = self.tree.create(path, is_dir, ephemeral)?;
        if let Some(parent) = self.tree.parent_of(id) {
            let (_, name) = split_path(path);
            self.emit_to_subscribers(parent, Notification::ChildNodeAdded(name.to_string()), out);
        }
        debug!(path, node = %id, is_dir, ephemeral, "node created");
        Ok(id)
    }

    fn remove_node(&mut self, path: &str, out: &mut Outbox) -> Result<()> {
        let id = self.tree.check_remove(path, &self.locks)?;
        if self.tree.record_of(id).is_some() {
            self.kv.delete(&record_key(path))?;
        }
        let node = self.tree.remove(path, &self.locks)?;
        self.locks.remove_node(id);

        // handles on a deleted node become stale
        for handle in &node.handles {
            if let Ok(h) = self.handles.remove(*handle) {
                if let Some(session) = self.sessions.get_mut(h.session) {
                    session.handles.remove(handle);
                }
                out.retire(*handle);
            }
        }

        let (parent_path, name) = split_path(path);
        if let Ok(parent) = self.tree.lookup(parent_path) {
            self.emit_to_subscribers(parent, Notification::ChildNodeRemoved(name.to_string()), out);
        }
        debug!(path, node = %id, "node removed");
        Ok(())
    }

    fn promote(&mut self, node: NodeId, out: &mut Outbox) {
        for grant in self.locks.promote(node) {
            if let Some(session) = self.sessions.get_mut(grant.session) {
                session.locks.insert((node, grant.handle));
            }
            debug!(node = %node, handle = %grant.handle, mode = %grant.mode, "lock promoted");
            self.emit(grant.handle, Notification::LockAcquired, out);
        }
    }

    fn forget_lock(&mut self, session: SessionId, node: NodeId, handle: HandleId) {
        if let Some(s) = self.sessions.get_mut(session) {
            s.locks.remove(&(node, handle));
        }
    }

    /// Removes a handle from every table; drops its node if it was the last
    /// handle on an idle ephemeral node.
    fn detach_handle(&mut self, handle: HandleId, out: &mut Outbox) -> Result<()> {
        let h = self.handles.remove(handle)?;
        if let Some(session) = self.sessions.get_mut(h.session) {
            session.handles.remove(&handle);
        }
        out.retire(handle);

        if let Some(node) = self.tree.get_mut(h.node) {
            node.handles.remove(&handle);
        }
        self.reap_idle_ephemeral(h.node, out)
    }

    /// Removes `start` if it is an idle ephemeral node, then walks up while
    /// each removal leaves the parent idle and ephemeral too.
    fn reap_idle_ephemeral(&mut self, start: NodeId, out: &mut Outbox) -> Result<()> {
        let mut doomed = self.idle_ephemeral(start);
        while let Some(path) = doomed {
            self.remove_node(&path, out)?;
            doomed = self
                .tree
                .lookup(split_path(&path).0)
                .ok()
                .and_then(|parent| self.idle_ephemeral(parent));
        }
        Ok(())
    }

    fn delete(
        &mut self,
        session: SessionId,
        path: &str,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<()> {
        self.sessions.touch(session, now)?;
        validate_path(path)?;
        let parent = self.tree.lookup(split_path(path).0).ok();
        self.remove_node(path, out)?;
        match parent {
            Some(parent) => self.reap_idle_ephemeral(parent, out),
            None => Ok(()),
        }
    }

    fn idle_ephemeral(&self, id: NodeId) -> Option<String> {
        let node = self.tree.get(id)?;
        let idle = node.handles.is_empty() && node.children.is_empty() && !self.locks.is_held(id);
        (node.ephemeral && idle).then(|| node.path.clone())
    }

    fn open(
        &mut self,
        session: SessionId,
        path: &str,
        flags: OpenFlags,
        mask: EventMask,
        sink: Arc<dyn EventSink>,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<HandleId> {
        self.sessions.touch(session, now)?;
        validate_path(path)?;
        let node = match self.tree.lookup(path) {
            Ok(id) => {
                if flags.contains(OpenFlags::CREATE) && flags.contains(OpenFlags::EXCL) {
                    return Err(HyperspaceError::NodeExists(path.to_string()));
                }
                id
            }
            Err(HyperspaceError::NoSuchNode(_)) if flags.contains(OpenFlags::CREATE) => self
                .create_node(
                    path,
                    flags.contains(OpenFlags::DIRECTORY),
                    flags.contains(OpenFlags::EPHEMERAL),
                    out,
                )?,
            Err(e) => return Err(e),
        };

        let handle = self.handles.insert(session, node, mask, sink);
        if let Some(n) = self.tree.get_mut(node) {
            n.handles.insert(handle);
        }
        if let Some(s) = self.sessions.get_mut(session) {
            s.handles.insert(handle);
        }
        debug!(session = %session, path, handle = %handle, "handle opened");
        Ok(handle)
    }

    fn close(
        &mut self,
        caller: SessionId,
        handle: HandleId,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<()> {
        let (session, node) = self.session_of(handle, caller, now)?;
        if self.locks.is_holder(node, handle) {
            self.locks.release(node, handle)?;
            self.forget_lock(session, node, handle);
            self.emit(handle, Notification::LockReleased, out);
            self.promote(node, out);
        } else if self.locks.dequeue(node, handle).is_some() {
            self.promote(node, out);
        }
        self.locks.check_invariants(node)?;
        self.detach_handle(handle, out)?;
        debug!(handle = %handle, "handle closed");
        Ok(())
    }

    /// Tears a session down in three passes: every release first, then
    /// promotions of other sessions' waiters, then handle detachment.
    fn teardown(&mut self, session: SessionId, out: &mut Outbox) -> Result<()> {
        let handles: Vec<HandleId> = self
            .sessions
            .get(session)
            .map(|s| s.handles.iter().copied().collect())
            .unwrap_or_default();

        let mut touched = BTreeSet::new();
        for &handle in &handles {
            let Ok(node) = self.handles.get(handle).map(|h| h.node) else {
                continue;
            };
            if self.locks.is_holder(node, handle) {
                self.locks.release(node, handle)?;
                self.emit(handle, Notification::LockReleased, out);
                touched.insert(node);
            } else if self.locks.dequeue(node, handle).is_some() {
                touched.insert(node);
            }
        }
        if let Some(s) = self.sessions.get_mut(session) {
            s.locks.clear();
        }

        for &node in &touched {
            self.promote(node, out);
        }
        for &node in &touched {
            self.locks.check_invariants(node)?;
        }

        for &handle in &handles {
            self.detach_handle(handle, out)?;
        }
        self.sessions.remove(session);
        info!(session = %session, handles = handles.len(), "session destroyed");
        Ok(())
    }

    fn attr_set(
        &mut self,
        caller: SessionId,
        handle: HandleId,
        name: &str,
        value: &[u8],
        now: Instant,
        out: &mut Outbox,
    ) -> Result<()> {
        let (_, node) = self.session_of(handle, caller, now)?;
        self.persist_with(node, |record| {
            record.attrs.insert(name.to_string(), value.to_vec());
        })?;
        if let Some(n) = self.tree.get_mut(node) {
            n.attrs.insert(name.to_string(), value.to_vec());
        }
        self.emit_to_subscribers(node, Notification::AttrSet(name.to_string()), out);
        Ok(())
    }

    fn attr_del(
        &mut self,
        caller: SessionId,
        handle: HandleId,
        name: &str,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<()> {
        let (_, node) = self.session_of(handle, caller, now)?;
        if !self.node(node)?.attrs.contains_key(name) {
            return Err(HyperspaceError::NoSuchAttr(name.to_string()));
        }
        self.persist_with(node, |record| {
            record.attrs.remove(name);
        })?;
        if let Some(n) = self.tree.get_mut(node) {
            n.attrs.remove(name);
        }
        self.emit_to_subscribers(node, Notification::AttrDel(name.to_string()), out);
        Ok(())
    }

    fn lock(
        &mut self,
        caller: SessionId,
        handle: HandleId,
        mode: LockMode,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<LockStatus> {
        let (session, node) = self.session_of(handle, caller, now)?;
        let status = self.locks.try_acquire(node, session, handle, mode)?;
        if let LockStatus::Granted { .. } = status {
            if let Some(s) = self.sessions.get_mut(session) {
                s.locks.insert((node, handle));
            }
            self.emit(handle, Notification::LockAcquired, out);
        }
        self.locks.check_invariants(node)?;
        debug!(handle = %handle, mode = %mode, ?status, "lock requested");
        Ok(status)
    }

    fn try_lock(
        &mut self,
        caller: SessionId,
        handle: HandleId,
        mode: LockMode,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<u64> {
        let (session, node) = self.session_of(handle, caller, now)?;
        let generation = self.locks.try_lock(node, session, handle, mode)?;
        if let Some(s) = self.sessions.get_mut(session) {
            s.locks.insert((node, handle));
        }
        self.emit(handle, Notification::LockAcquired, out);
        self.locks.check_invariants(node)?;
        Ok(generation)
    }

    fn release(
        &mut self,
        caller: SessionId,
        handle: HandleId,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<()> {
        let (session, node) = self.session_of(handle, caller, now)?;
        self.locks.release(node, handle)?;
        self.forget_lock(session, node, handle);
        self.emit(handle, Notification::LockReleased, out);
        self.promote(node, out);
        self.locks.check_invariants(node)?;
        debug!(handle = %handle, "lock released");
        Ok(())
    }
}

/// The coordination master.
///
/// Must be created inside a tokio runtime; it spawns the event dispatcher.
pub struct Master {
    state: RwLock<MasterState>,
    dispatcher: Dispatcher,
    failed: AtomicBool,
}

impl Master {
    /// Creates a master with an empty namespace, writing through to `kv`.
    pub fn new(lease: LeaseConfig, kv: Arc<dyn KvStore>) -> Self {
        Self::with_tree(NamespaceTree::new(), lease, kv)
    }

    /// Creates a master whose namespace is rehydrated from `kv`.
    pub fn recover(lease: LeaseConfig, kv: Arc<dyn KvStore>) -> Result<Self> {
        let tree = NamespaceTree::recover(kv.as_ref())?;
        info!(nodes = tree.len(), "namespace recovered");
        Ok(Self::with_tree(tree, lease, kv))
    }

    fn with_tree(tree: NamespaceTree, lease: LeaseConfig, kv: Arc<dyn KvStore>) -> Self {
        let (dispatcher, _router) = Dispatcher::spawn();
        Self {
            state: RwLock::new(MasterState {
                tree,
                locks: LockTable::new(),
                sessions: SessionTable::new(lease, Instant::now()),
                handles: HandleTable::new(),
                kv,
            }),
            dispatcher,
            failed: AtomicBool::new(false),
        }
    }

    fn fail(&self, reason: &str) -> HyperspaceError {
        if !self.failed.swap(true, Ordering::SeqCst) {
            error!(reason, "internal invariant violated, master halted");
        }
        HyperspaceError::Corrupted(reason.to_string())
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(HyperspaceError::Corrupted("master halted".to_string()));
        }
        Ok(())
    }

    /// Returns true once an invariant violation has halted the master.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut MasterState, &mut Outbox) -> Result<T>) -> Result<T> {
        self.ensure_healthy()?;
        let mut state = self
            .state
            .write()
            .map_err(|_| self.fail("state lock poisoned"))?;
        let mut out = Outbox::default();
        let result = op(&mut state, &mut out);
        for item in out.items {
            match item {
                Outgoing::Deliver(event, sink) => self.dispatcher.enqueue(event, sink),
                Outgoing::Retire(handle) => self.dispatcher.retire(handle),
            }
        }
        drop(state);
        if let Err(HyperspaceError::Corrupted(reason)) = &result {
            return Err(self.fail(reason));
        }
        result
    }

    fn read<T>(&self, op: impl FnOnce(&MasterState) -> Result<T>) -> Result<T> {
        self.ensure_healthy()?;
        let state = self
            .state
            .read()
            .map_err(|_| self.fail("state lock poisoned"))?;
        let result = op(&state);
        drop(state);
        if let Err(HyperspaceError::Corrupted(reason)) = &result {
            return Err(self.fail(reason));
        }
        result
    }

    /// Opens a new session; returns its id and lease deadline.
    pub fn create_session(&self) -> Result<(SessionId, Instant)> {
        self.mutate(|state, _| {
            let (id, deadline) = state.sessions.create(Instant::now());
            info!(session = %id, "session created");
            Ok((id, deadline))
        })
    }

    /// Renews a session's lease and returns the new deadline.
    pub fn keepalive(&self, session: SessionId) -> Result<Instant> {
        self.mutate(|state, _| state.sessions.renew(session, Instant::now()))
    }

    /// Destroys a session, closing its handles and releasing its locks in one step.
    pub fn destroy_session(&self, session: SessionId) -> Result<()> {
        self.mutate(|state, out| {
            state.sessions.expire(session)?;
            state.teardown(session, out)
        })
    }

    /// Advances session leases to `now` and destroys every session whose
    /// grace period has elapsed.
    pub fn expire_sessions(&self, now: Instant) -> Result<Vec<SessionId>> {
        self.mutate(|state, out| {
            let expired = state.sessions.tick(now);
            for &session in &expired {
                state.teardown(session, out)?;
            }
            Ok(expired)
        })
    }

    /// Lifecycle state of a session, if it still exists.
    pub fn session_state(&self, session: SessionId) -> Option<SessionState> {
        self.state.read().ok()?.sessions.state(session)
    }

    /// Opens a handle on `path`, creating the node if `flags` ask for it.
    pub fn open(
        &self,
        session: SessionId,
        path: &str,
        flags: OpenFlags,
        mask: EventMask,
        sink: Arc<dyn EventSink>,
    ) -> Result<HandleId> {
        self.mutate(|state, out| state.open(session, path, flags, mask, sink, Instant::now(), out))
    }

    /// Closes a handle of `session`, withdrawing any lock interest it has.
    pub fn close(&self, session: SessionId, handle: HandleId) -> Result<()> {
        self.mutate(|state, out| state.close(session, handle, Instant::now(), out))
    }

    /// Creates a directory.
    pub fn mkdir(&self, session: SessionId, path: &str) -> Result<()> {
        self.mutate(|state, out| {
            state.sessions.touch(session, Instant::now())?;
            state.create_node(path, true, false, out).map(|_| ())
        })
    }

    /// Deletes a childless, unlocked node. Handles open on it become stale,
    /// and an ephemeral parent left idle goes with it.
    pub fn delete(&self, session: SessionId, path: &str) -> Result<()> {
        self.mutate(|state, out| state.delete(session, path, Instant::now(), out))
    }

    /// Returns true if `path` names an existing node; false for malformed paths.
    pub fn exists(&self, session: SessionId, path: &str) -> Result<bool> {
        self.read(|state| {
            state.sessions.touch(session, Instant::now())?;
            Ok(validate_path(path).is_ok() && state.tree.exists(path))
        })
    }

    /// Sets an attribute on the handle's node.
    pub fn attr_set(
        &self,
        session: SessionId,
        handle: HandleId,
        name: &str,
        value: &[u8],
    ) -> Result<()> {
        self.mutate(|state, out| state.attr_set(session, handle, name, value, Instant::now(), out))
    }

    /// Reads an attribute of the handle's node.
    pub fn attr_get(&self, session: SessionId, handle: HandleId, name: &str) -> Result<Vec<u8>> {
        self.read(|state| {
            let (_, node) = state.session_of(handle, session, Instant::now())?;
            state
                .node(node)?
                .attrs
                .get(name)
                .cloned()
                .ok_or_else(|| HyperspaceError::NoSuchAttr(name.to_string()))
        })
    }

    /// Deletes an attribute of the handle's node.
    pub fn attr_del(&self, session: SessionId, handle: HandleId, name: &str) -> Result<()> {
        self.mutate(|state, out| state.attr_del(session, handle, name, Instant::now(), out))
    }

    /// Returns true if the handle's node has attribute `name`.
    pub fn attr_exists(&self, session: SessionId, handle: HandleId, name: &str) -> Result<bool> {
        self.read(|state| {
            let (_, node) = state.session_of(handle, session, Instant::now())?;
            Ok(state.node(node)?.attrs.contains_key(name))
        })
    }

    /// Names of all attributes of the handle's node.
    pub fn attr_list(&self, session: SessionId, handle: HandleId) -> Result<Vec<String>> {
        self.read(|state| {
            let (_, node) = state.session_of(handle, session, Instant::now())?;
            Ok(state.node(node)?.attrs.keys().cloned().collect())
        })
    }

    /// Names of the children of the handle's node.
    pub fn readdir(&self, session: SessionId, handle: HandleId) -> Result<Vec<String>> {
        self.read(|state| {
            let (_, node) = state.session_of(handle, session, Instant::now())?;
            Ok(state.node(node)?.children.iter().cloned().collect())
        })
    }

    /// Requests the handle's node lock; never blocks.
    pub fn lock(&self, session: SessionId, handle: HandleId, mode: LockMode) -> Result<LockStatus> {
        self.mutate(|state, out| state.lock(session, handle, mode, Instant::now(), out))
    }

    /// Takes the handle's node lock only if it is free right now; returns
    /// the lock generation.
    pub fn try_lock(&self, session: SessionId, handle: HandleId, mode: LockMode) -> Result<u64> {
        self.mutate(|state, out| state.try_lock(session, handle, mode, Instant::now(), out))
    }

    /// Releases the handle's lock and promotes waiters.
    pub fn release(&self, session: SessionId, handle: HandleId) -> Result<()> {
        self.mutate(|state, out| state.release(session, handle, Instant::now(), out))
    }

    /// Lock state of the node at `path`.
    pub fn lock_info(&self, path: &str) -> Result<LockInfo> {
        self.read(|state| {
            let node = state.tree.lookup(path)?;
            Ok(match state.locks.get(node) {
                Some(lock) => LockInfo {
                    mode: lock.mode(),
                    generation: lock.generation(),
                    holders: lock.holders().to_vec(),
                    waiters: lock.pending().copied().collect(),
                },
                None => LockInfo {
                    mode: LockMode::None,
                    generation: 0,
                    holders: Vec::new(),
                    waiters: Vec::new(),
                },
            })
        })
    }

    /// Table sizes.
    pub fn status(&self) -> Result<MasterStatus> {
        self.read(|state| {
            Ok(MasterStatus {
                nodes: state.tree.len(),
                sessions: state.sessions.len(),
                handles: state.handles.len(),
            })
        })
    }

    /// Verifies the lock invariants of every node; a violation halts the master.
    pub fn check_invariants(&self) -> Result<()> {
        self.read(|state| state.locks.check_all())
    }

    /// Waits until every event enqueued so far has been delivered or dropped.
    pub async fn flush(&self) {
        self.dispatcher.flush().await
    }

    /// Delivery counters.
    pub fn dispatch_stats(&self) -> &DispatchStats {
        self.dispatcher.stats()
    }

    /// Runs lease expiry every `period` until `shutdown` turns true.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let master = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match master.expire_sessions(Instant::now()) {
                            Ok(expired) if !expired.is_empty() => {
                                info!(count = expired.len(), "expired sessions reaped");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(error = %e, "lease reaper stopped");
                                break;
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("lease reaper exited");
        })
    }
}
