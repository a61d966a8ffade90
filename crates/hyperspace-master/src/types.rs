//! Identifiers, event masks, open flags, lock modes, errors and path
//! helpers shared by every module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node in the namespace tree
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The root directory `/` (always 1)
    pub const ROOT: NodeId = NodeId(1);

    /// Creates a new NodeId from a raw u64 value
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Returns the raw u64 value of this node ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a client session
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a new SessionId from a raw u64 value
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }

    /// Returns the raw u64 value of this session ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an open handle
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(u64);

impl HandleId {
    /// Creates a new HandleId from a raw u64 value
    pub fn new(id: u64) -> Self {
        HandleId(id)
    }

    /// Returns the raw u64 value of this handle ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of event kinds a handle is interested in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventMask(u32);

impl EventMask {
    /// No events.
    pub const NONE: EventMask = EventMask(0);
    /// An attribute was set on the node.
    pub const ATTR_SET: EventMask = EventMask(0x01);
    /// An attribute was deleted from the node.
    pub const ATTR_DEL: EventMask = EventMask(0x02);
    /// A child was added to the (directory) node.
    pub const CHILD_NODE_ADDED: EventMask = EventMask(0x04);
    /// A child was removed from the (directory) node.
    pub const CHILD_NODE_REMOVED: EventMask = EventMask(0x08);
    /// The handle acquired the node's lock.
    pub const LOCK_ACQUIRED: EventMask = EventMask(0x10);
    /// The handle released the node's lock.
    pub const LOCK_RELEASED: EventMask = EventMask(0x20);
    /// Every event kind.
    pub const ALL: EventMask = EventMask(0x3f);

    /// Builds a mask from raw bits, ignoring unknown bits.
    pub fn from_bits(bits: u32) -> Self {
        EventMask(bits & Self::ALL.0)
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set in this mask.
    pub fn contains(&self, other: EventMask) -> bool {
        other.0 != 0 && (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for EventMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        EventMask(self.0 | rhs.0)
    }
}

/// Flags controlling how `open` resolves or creates its node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Plain open of an existing node.
    pub const NONE: OpenFlags = OpenFlags(0);
    /// Create the node if it does not exist.
    pub const CREATE: OpenFlags = OpenFlags(0x01);
    /// With CREATE, fail if the node already exists.
    pub const EXCL: OpenFlags = OpenFlags(0x02);
    /// A node created by this open is removed once its last handle closes.
    pub const EPHEMERAL: OpenFlags = OpenFlags(0x04);
    /// A node created by this open is a directory.
    pub const DIRECTORY: OpenFlags = OpenFlags(0x08);

    /// Builds flags from raw bits, ignoring unknown bits.
    pub fn from_bits(bits: u32) -> Self {
        OpenFlags(bits & 0x0f)
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Checks if this flags contains another flags.
    pub fn contains(&self, other: OpenFlags) -> bool {
        (self.0 & other.0) != 0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Mode of a node lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Nobody holds the lock.
    None,
    /// Any number of holders, no exclusive holder.
    Shared,
    /// Exactly one holder.
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::None => write!(f, "none"),
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Outcome of a lock request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    /// The lock was granted immediately.
    Granted {
        /// Lock generation of the node at grant time.
        generation: u64,
    },
    /// The request was queued; LOCK_ACQUIRED arrives when it is promoted.
    Queued,
}

/// Wire-stable error code for every [`HyperspaceError`] variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Malformed request encoding.
    Protocol = 1,
    /// Unknown or closed handle.
    BadHandle = 2,
    /// Unknown or expired session.
    NoSuchSession = 3,
    /// Path does not resolve to a node.
    NoSuchNode = 4,
    /// Parent of the path does not exist.
    NoSuchParent = 5,
    /// Node already exists.
    NodeExists = 6,
    /// Node still has children.
    NodeNotEmpty = 7,
    /// Node lock is held.
    LockHeld = 8,
    /// Handle already holds or waits for the lock.
    AlreadyHolding = 9,
    /// Handle does not hold the lock.
    NotLockHolder = 10,
    /// Attribute does not exist.
    NoSuchAttr = 11,
    /// Parent is not a directory.
    NotADirectory = 12,
    /// Path is not a valid absolute path.
    InvalidPath = 13,
    /// Lock mode is not SHARED or EXCLUSIVE.
    InvalidLockMode = 14,
    /// Lock could not be granted without waiting.
    Busy = 15,
    /// Persistence collaborator failure.
    Store = 16,
    /// Master state is corrupt; no further requests are served.
    Corrupted = 17,
}

/// Error types for master operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HyperspaceError {
    /// The request could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The handle is unknown, closed, or was invalidated.
    #[error("bad handle {0}")]
    BadHandle(HandleId),

    /// The session is unknown or expired.
    #[error("no such session {0}")]
    NoSuchSession(SessionId),

    /// The path does not exist.
    #[error("node '{0}' not found")]
    NoSuchNode(String),

    /// The parent directory of the path does not exist.
    #[error("parent of '{0}' not found")]
    NoSuchParent(String),

    /// The path already exists.
    #[error("node '{0}' already exists")]
    NodeExists(String),

    /// The node still has children.
    #[error("node '{0}' is not empty")]
    NodeNotEmpty(String),

    /// The node is locked.
    #[error("lock held on '{0}'")]
    LockHeld(String),

    /// The handle already holds or is queued for the node's lock.
    #[error("handle {0} already holding or waiting for lock")]
    AlreadyHolding(HandleId),

    /// The handle does not hold the node's lock.
    #[error("handle {0} is not a lock holder")]
    NotLockHolder(HandleId),

    /// The attribute does not exist on the node.
    #[error("attribute '{0}' not found")]
    NoSuchAttr(String),

    /// Children may only be created under directories.
    #[error("'{0}' is not a directory")]
    NotADirectory(String),

    /// The path is not absolute or has empty components.
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// Locks may only be requested in SHARED or EXCLUSIVE mode.
    #[error("invalid lock mode {0}")]
    InvalidLockMode(LockMode),

    /// A try-lock could not be granted immediately.
    #[error("lock busy")]
    Busy,

    /// The persistence collaborator failed.
    #[error("store error: {0}")]
    Store(String),

    /// An internal invariant was violated; the master stops serving.
    #[error("master state corrupted: {0}")]
    Corrupted(String),
}

impl HyperspaceError {
    /// Returns the wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            HyperspaceError::Protocol(_) => ErrorCode::Protocol,
            HyperspaceError::BadHandle(_) => ErrorCode::BadHandle,
            HyperspaceError::NoSuchSession(_) => ErrorCode::NoSuchSession,
            HyperspaceError::NoSuchNode(_) => ErrorCode::NoSuchNode,
            HyperspaceError::NoSuchParent(_) => ErrorCode::NoSuchParent,
            HyperspaceError::NodeExists(_) => ErrorCode::NodeExists,
            HyperspaceError::NodeNotEmpty(_) => ErrorCode::NodeNotEmpty,
            HyperspaceError::LockHeld(_) => ErrorCode::LockHeld,
            HyperspaceError::AlreadyHolding(_) => ErrorCode::AlreadyHolding,
            HyperspaceError::NotLockHolder(_) => ErrorCode::NotLockHolder,
            HyperspaceError::NoSuchAttr(_) => ErrorCode::NoSuchAttr,
            HyperspaceError::NotADirectory(_) => ErrorCode::NotADirectory,
            HyperspaceError::InvalidPath(_) => ErrorCode::InvalidPath,
            HyperspaceError::InvalidLockMode(_) => ErrorCode::InvalidLockMode,
            HyperspaceError::Busy => ErrorCode::Busy,
            HyperspaceError::Store(_) => ErrorCode::Store,
            HyperspaceError::Corrupted(_) => ErrorCode::Corrupted,
        }
    }
}

/// Result alias for master operations.
pub type Result<T> = std::result::Result<T, HyperspaceError>;

/// Checks that `path` is absolute with no empty components and no trailing slash.
pub fn validate_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path[1..].split('/').any(str::is_empty)
    {
        return Err(HyperspaceError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Splits a validated non-root path into its parent path and final name.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a").is_ok());
        assert!(validate_path("/a/b/c").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a/").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/a"), ("/", "a"));
        assert_eq!(split_path("/a/b/c"), ("/a/b", "c"));
    }

    #[test]
    fn test_event_mask_contains() {
        let mask = EventMask::LOCK_ACQUIRED | EventMask::LOCK_RELEASED;
        assert!(mask.contains(EventMask::LOCK_ACQUIRED));
        assert!(mask.contains(EventMask::LOCK_RELEASED));
        assert!(!mask.contains(EventMask::ATTR_SET));
        assert!(!mask.contains(EventMask::NONE));
        assert_eq!(EventMask::from_bits(0xffff_ffff), EventMask::ALL);
    }

    #[test]
    fn test_open_flags() {
        let flags = OpenFlags::CREATE | OpenFlags::EPHEMERAL;
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(flags.contains(OpenFlags::EPHEMERAL));
        assert!(!flags.contains(OpenFlags::EXCL));
        assert_eq!(OpenFlags::from_bits(0xff).bits(), 0x0f);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            HyperspaceError::BadHandle(HandleId::new(3)).code(),
            ErrorCode::BadHandle
        );
        assert_eq!(HyperspaceError::Busy.code(), ErrorCode::Busy);
        assert_eq!(
            HyperspaceError::LockHeld("/x".into()).to_string(),
            "lock held on '/x'"
        );
    }
}
