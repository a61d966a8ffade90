//! Open handles: subscriptions of a session to a node.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::dispatcher::EventSink;
use crate::types::*;

/// An open reference from a session to a node.
#[derive(Clone)]
pub struct Handle {
    /// Handle identifier.
    pub id: HandleId,
    /// Owning session.
    pub session: SessionId,
    /// Node the handle is open on.
    pub node: NodeId,
    /// Events the handle wants.
    pub mask: EventMask,
    /// Where the handle's events go.
    pub sink: Arc<dyn EventSink>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("node", &self.node)
            .field("mask", &self.mask)
            .finish()
    }
}

/// Table of open handles.
pub struct HandleTable {
    handles: HashMap<HandleId, Handle>,
    next_id: u64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a handle and returns its fresh id.
    pub fn insert(
        &mut self,
        session: SessionId,
        node: NodeId,
        mask: EventMask,
        sink: Arc<dyn EventSink>,
    ) -> HandleId {
        let id = HandleId::new(self.next_id);
        self.next_id += 1;
        self.handles.insert(
            id,
            Handle {
                id,
                session,
                node,
                mask,
                sink,
            },
        );
        id
    }

    /// Looks up a handle; unknown or closed ids fail with `BadHandle`.
    pub fn get(&self, id: HandleId) -> Result<&Handle> {
        self.handles.get(&id).ok_or(HyperspaceError::BadHandle(id))
    }

    /// Removes a handle.
    pub fn remove(&mut self, id: HandleId) -> Result<Handle> {
        self.handles.remove(&id).ok_or(HyperspaceError::BadHandle(id))
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no handles are open.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
