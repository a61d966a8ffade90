//! Wire protocol between clients and the master.
//!
//! Every message is a frame with a fixed 20-byte header followed by a
//! bincode payload:
//!
//! ```text
//! magic:4 | version:1 | kind:1 | opcode:2 | request_id:8 | payload_length:4
//! ```
//!
//! Header damage (bad magic, version or length) desynchronizes the stream
//! and is a codec error that closes the connection. A well-framed request
//! whose opcode or payload does not decode is answered with a protocol-error
//! response and never reaches the master.

use bincode::Options;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::dispatcher::Notification;
use crate::types::*;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 20;

/// Protocol magic number ("HYSP").
pub const MAGIC: u32 = 0x4859_5350;

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Direction of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client to master.
    Request = 1,
    /// Master to client, answering a request.
    Response = 2,
    /// Master to client, unsolicited notification.
    Event = 3,
}

impl FrameKind {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(FrameKind::Request),
            2 => Some(FrameKind::Response),
            3 => Some(FrameKind::Event),
            _ => None,
        }
    }
}

/// Operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// Open a session.
    CreateSession = 0x0001,
    /// Renew a session lease.
    Keepalive = 0x0002,
    /// Destroy a session.
    DestroySession = 0x0003,
    /// Open a handle.
    Open = 0x0010,
    /// Close a handle.
    Close = 0x0011,
    /// Create a directory.
    Mkdir = 0x0012,
    /// Delete a node.
    Delete = 0x0013,
    /// Test node existence.
    Exists = 0x0014,
    /// List children.
    Readdir = 0x0015,
    /// Set an attribute.
    AttrSet = 0x0020,
    /// Read an attribute.
    AttrGet = 0x0021,
    /// Delete an attribute.
    AttrDel = 0x0022,
    /// Test attribute existence.
    AttrExists = 0x0023,
    /// List attribute names.
    AttrList = 0x0024,
    /// Request a lock.
    Lock = 0x0030,
    /// Request a lock without queueing.
    TryLock = 0x0031,
    /// Release a lock.
    Release = 0x0032,
    /// Table sizes.
    Status = 0x0040,
    /// Notification for a handle.
    Event = 0x0100,
}

impl Opcode {
    /// Parses a raw opcode.
    pub fn from_u16(raw: u16) -> Option<Self> {
        use Opcode::*;
        let op = match raw {
            0x0001 => CreateSession,
            0x0002 => Keepalive,
            0x0003 => DestroySession,
            0x0010 => Open,
            0x0011 => Close,
            0x0012 => Mkdir,
            0x0013 => Delete,
            0x0014 => Exists,
            0x0015 => Readdir,
            0x0020 => AttrSet,
            0x0021 => AttrGet,
            0x0022 => AttrDel,
            0x0023 => AttrExists,
            0x0024 => AttrList,
            0x0030 => Lock,
            0x0031 => TryLock,
            0x0032 => Release,
            0x0040 => Status,
            0x0100 => Event,
            _ => return None,
        };
        Some(op)
    }
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Direction.
    pub kind: FrameKind,
    /// Raw opcode; validated when the payload is decoded.
    pub opcode: u16,
    /// Correlates responses with requests; 0 for events.
    pub request_id: u64,
    /// bincode payload.
    pub payload: Bytes,
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Open a new session.
    CreateSession,
    /// Renew a session lease.
    Keepalive {
        /// Session to renew.
        session: SessionId,
    },
    /// Destroy a session and everything it owns.
    DestroySession {
        /// Session to destroy.
        session: SessionId,
    },
    /// Open a handle on a path.
    Open {
        /// Owning session.
        session: SessionId,
        /// Absolute path.
        path: String,
        /// Raw [`OpenFlags`] bits.
        flags: u32,
        /// Raw [`EventMask`] bits.
        event_mask: u32,
    },
    /// Close a handle.
    Close {
        /// Session owning the handle.
        session: SessionId,
        /// Handle to close.
        handle: HandleId,
    },
    /// Create a directory.
    Mkdir {
        /// Requesting session.
        session: SessionId,
        /// Absolute path.
        path: String,
    },
    /// Delete a node.
    Delete {
        /// Requesting session.
        session: SessionId,
        /// Absolute path.
        path: String,
    },
    /// Test whether a path exists.
    Exists {
        /// Requesting session.
        session: SessionId,
        /// Absolute path.
        path: String,
    },
    /// List the children of the handle's node.
    Readdir {
        /// Session owning the handle.
        session: SessionId,
        /// Directory handle.
        handle: HandleId,
    },
    /// Set an attribute.
    AttrSet {
        /// Session owning the handle.
        session: SessionId,
        /// Target handle.
        handle: HandleId,
        /// Attribute name.
        name: String,
        /// Attribute value.
        value: Vec<u8>,
    },
    /// Read an attribute.
    AttrGet {
        /// Session owning the handle.
        session: SessionId,
        /// Target handle.
        handle: HandleId,
        /// Attribute name.
        name: String,
    },
    /// Delete an attribute.
    AttrDel {
        /// Session owning the handle.
        session: SessionId,
        /// Target handle.
        handle: HandleId,
        /// Attribute name.
        name: String,
    },
    /// Test whether an attribute exists.
    AttrExists {
        /// Session owning the handle.
        session: SessionId,
        /// Target handle.
        handle: HandleId,
        /// Attribute name.
        name: String,
    },
    /// List attribute names.
    AttrList {
        /// Session owning the handle.
        session: SessionId,
        /// Target handle.
        handle: HandleId,
    },
    /// Request the node lock.
    Lock {
        /// Session owning the handle.
        session: SessionId,
        /// Target handle.
        handle: HandleId,
        /// Requested mode.
        mode: LockMode,
    },
    /// Request the node lock without queueing.
    TryLock {
        /// Session owning the handle.
        session: SessionId,
        /// Target handle.
        handle: HandleId,
        /// Requested mode.
        mode: LockMode,
    },
    /// Release the node lock.
    Release {
        /// Session owning the handle.
        session: SessionId,
        /// Holding handle.
        handle: HandleId,
    },
    /// Table sizes.
    Status,
}

impl Request {
    /// Opcode carried in the frame header for this request.
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::CreateSession => Opcode::CreateSession,
            Request::Keepalive { .. } => Opcode::Keepalive,
            Request::DestroySession { .. } => Opcode::DestroySession,
            Request::Open { .. } => Opcode::Open,
            Request::Close { .. } => Opcode::Close,
            Request::Mkdir { .. } => Opcode::Mkdir,
            Request::Delete { .. } => Opcode::Delete,
            Request::Exists { .. } => Opcode::Exists,
            Request::Readdir { .. } => Opcode::Readdir,
            Request::AttrSet { .. } => Opcode::AttrSet,
            Request::AttrGet { .. } => Opcode::AttrGet,
            Request::AttrDel { .. } => Opcode::AttrDel,
            Request::AttrExists { .. } => Opcode::AttrExists,
            Request::AttrList { .. } => Opcode::AttrList,
            Request::Lock { .. } => Opcode::Lock,
            Request::TryLock { .. } => Opcode::TryLock,
            Request::Release { .. } => Opcode::Release,
            Request::Status => Opcode::Status,
        }
    }
}

/// The master's answer to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Success with no value.
    Ok,
    /// A session was created.
    Session {
        /// New session id.
        session: SessionId,
        /// Milliseconds until the lease lapses.
        lease_ms: u64,
    },
    /// A lease was renewed.
    Lease {
        /// Milliseconds until the lease lapses.
        lease_ms: u64,
    },
    /// A handle was opened.
    Handle {
        /// New handle id.
        handle: HandleId,
    },
    /// Boolean result.
    Bool(bool),
    /// Attribute value.
    Value(Vec<u8>),
    /// Child or attribute names.
    Names(Vec<String>),
    /// Lock request outcome.
    Lock(LockStatus),
    /// Try-lock granted with this generation.
    Generation(u64),
    /// Table sizes.
    Status {
        /// Nodes including the root.
        nodes: u64,
        /// Live sessions.
        sessions: u64,
        /// Open handles.
        handles: u64,
    },
    /// The request failed.
    Error {
        /// Error kind.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl From<HyperspaceError> for Response {
    fn from(e: HyperspaceError) -> Self {
        Response::Error {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Payload of an event frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Handle the event is for.
    pub handle: HandleId,
    /// What happened.
    pub notification: Notification,
}

fn wire() -> impl Options {
    bincode::DefaultOptions::new()
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Bytes> {
    wire()
        .serialize(value)
        .map(Bytes::from)
        .map_err(|e| HyperspaceError::Protocol(e.to_string()))
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    wire()
        .deserialize(payload)
        .map_err(|e| HyperspaceError::Protocol(format!("malformed payload: {}", e)))
}

/// Builds a request frame.
pub fn encode_request(request_id: u64, request: &Request) -> Result<Frame> {
    Ok(Frame {
        kind: FrameKind::Request,
        opcode: request.opcode() as u16,
        request_id,
        payload: encode_payload(request)?,
    })
}

/// Decodes and validates a request frame.
pub fn decode_request(frame: &Frame) -> Result<Request> {
    if frame.kind != FrameKind::Request {
        return Err(HyperspaceError::Protocol(format!(
            "expected request frame, got {:?}",
            frame.kind
        )));
    }
    let opcode = Opcode::from_u16(frame.opcode).ok_or_else(|| {
        HyperspaceError::Protocol(format!("unknown opcode 0x{:04X}", frame.opcode))
    })?;
    let request: Request = decode_payload(&frame.payload)?;
    if request.opcode() != opcode {
        return Err(HyperspaceError::Protocol(format!(
            "opcode {:?} does not match payload {:?}",
            opcode,
            request.opcode()
        )));
    }
    Ok(request)
}

/// Builds a response frame answering `request_id`.
pub fn encode_response(request_id: u64, opcode: u16, response: &Response) -> Result<Frame> {
    Ok(Frame {
        kind: FrameKind::Response,
        opcode,
        request_id,
        payload: encode_payload(response)?,
    })
}

/// Decodes a response frame.
pub fn decode_response(frame: &Frame) -> Result<Response> {
    if frame.kind != FrameKind::Response {
        return Err(HyperspaceError::Protocol("expected response frame".into()));
    }
    decode_payload(&frame.payload)
}

/// Builds an event frame.
pub fn encode_event(handle: HandleId, notification: Notification) -> Result<Frame> {
    Ok(Frame {
        kind: FrameKind::Event,
        opcode: Opcode::Event as u16,
        request_id: 0,
        payload: encode_payload(&EventMessage {
            handle,
            notification,
        })?,
    })
}

/// Decodes an event frame.
pub fn decode_event(frame: &Frame) -> Result<EventMessage> {
    if frame.kind != FrameKind::Event {
        return Err(HyperspaceError::Protocol("expected event frame".into()));
    }
    decode_payload(&frame.payload)
}

/// Codec failures that make the byte stream unusable.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Header did not start with [`MAGIC`].
    #[error("invalid magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic {
        /// Expected magic.
        expected: u32,
        /// Received magic.
        got: u32,
    },
    /// Unsupported protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Expected version.
        expected: u8,
        /// Received version.
        got: u8,
    },
    /// Unknown frame kind.
    #[error("invalid frame kind {0}")]
    InvalidKind(u8),
    /// Payload larger than allowed.
    #[error("payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge {
        /// Announced size.
        size: usize,
        /// Configured limit.
        max_size: usize,
    },
    /// Socket failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Length-delimited frame codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    /// Creates a codec accepting payloads up to `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, CodecError> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let mut header = &src[..FRAME_HEADER_SIZE];
        let magic = header.get_u32();
        if magic != MAGIC {
            return Err(CodecError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = header.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(CodecError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let raw_kind = header.get_u8();
        let kind = FrameKind::from_u8(raw_kind).ok_or(CodecError::InvalidKind(raw_kind))?;
        let opcode = header.get_u16();
        let request_id = header.get_u64();
        let len = header.get_u32() as usize;
        if len > self.max_frame_len {
            return Err(CodecError::PayloadTooLarge {
                size: len,
                max_size: self.max_frame_len,
            });
        }
        if src.len() < FRAME_HEADER_SIZE + len {
            src.reserve(FRAME_HEADER_SIZE + len - src.len());
            return Ok(None);
        }
        src.advance(FRAME_HEADER_SIZE);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame {
            kind,
            opcode,
            request_id,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> std::result::Result<(), CodecError> {
        if frame.payload.len() > self.max_frame_len {
            return Err(CodecError::PayloadTooLarge {
                size: frame.payload.len(),
                max_size: self.max_frame_len,
            });
        }
        dst.reserve(FRAME_HEADER_SIZE + frame.payload.len());
        dst.put_u32(MAGIC);
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(frame.kind as u8);
        dst.put_u16(frame.opcode);
        dst.put_u64(frame.request_id);
        dst.put_u32(frame.payload.len() as u32);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}
