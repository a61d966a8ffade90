//! TCP front end: one reader and one writer task per connection.
//!
//! The connection doubles as the event callback of every handle opened
//! through it; event frames share the writer queue with responses.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DeliveryError, EventSink, Notification};
use crate::master::Master;
use crate::protocol::*;
use crate::types::*;

/// Event callback that writes event frames to a client connection.
pub struct ConnectionSink {
    tx: mpsc::UnboundedSender<Frame>,
}

impl ConnectionSink {
    /// Wraps the writer queue of a connection.
    pub fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ConnectionSink {
    async fn deliver(
        &self,
        handle: HandleId,
        notification: Notification,
    ) -> std::result::Result<(), DeliveryError> {
        let frame = encode_event(handle, notification).map_err(|e| DeliveryError(e.to_string()))?;
        self.tx
            .send(frame)
            .map_err(|_| DeliveryError("connection closed".into()))
    }
}

/// Accepts connections until `shutdown` turns true.
///
/// A connection that observes a halted master raises `shutdown` itself.
pub async fn serve(
    master: Arc<Master>,
    listener: TcpListener,
    max_frame_len: usize,
    shutdown: Arc<watch::Sender<bool>>,
) -> std::io::Result<()> {
    let mut stop = shutdown.subscribe();
    info!(addr = ?listener.local_addr().ok(), "accepting connections");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                debug!(peer = %peer, "accepted connection");
                let master = Arc::clone(&master);
                let shutdown = Arc::clone(&shutdown);
                tokio::spawn(async move {
                    serve_connection(master, stream, peer, max_frame_len, shutdown).await;
                });
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    info!("listener stopped");
    Ok(())
}

async fn serve_connection(
    master: Arc<Master>,
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_len: usize,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let (read, write) = stream.into_split();
    let mut frames = FramedRead::new(read, FrameCodec::new(max_frame_len));
    let mut out = FramedWrite::new(write, FrameCodec::new(max_frame_len));

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let (closing_tx, mut closing_rx) = oneshot::channel::<()>();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = out.send(frame).await {
                            debug!(peer = %peer, error = %e, "write failed");
                            return;
                        }
                    }
                    None => return,
                },
                _ = &mut closing_rx => break,
            }
        }
        // handles of this connection may outlive it; later events are refused
        rx.close();
        while let Some(frame) = rx.recv().await {
            if out.send(frame).await.is_err() {
                return;
            }
        }
    });

    let events: Arc<dyn EventSink> = Arc::new(ConnectionSink::new(tx.clone()));
    let mut stop = shutdown.subscribe();
    loop {
        let next = tokio::select! {
            next = frames.next() => next,
            _ = stop.changed() => break,
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(peer = %peer, error = %e, "unreadable frame, closing connection");
                break;
            }
            None => break,
        };
        match handle_frame(&master, &events, &frame) {
            Ok(response) => {
                if tx.send(response).is_err() {
                    break;
                }
            }
            Err(e) => error!(peer = %peer, error = %e, "response encoding failed"),
        }
        if master.is_failed() {
            shutdown.send_replace(true);
            break;
        }
    }

    let _ = closing_tx.send(());
    let _ = writer.await;
    debug!(peer = %peer, "connection closed");
}

/// Decodes one request frame, runs it against the master and builds the
/// response frame. Malformed requests never reach the master.
pub fn handle_frame(master: &Master, events: &Arc<dyn EventSink>, frame: &Frame) -> Result<Frame> {
    let response = match decode_request(frame) {
        Ok(request) => execute(master, events, request).unwrap_or_else(Response::from),
        Err(e) => {
            warn!(request_id = frame.request_id, error = %e, "malformed request");
            Response::from(e)
        }
    };
    encode_response(frame.request_id, frame.opcode, &response)
}

fn remaining_ms(deadline: Instant) -> u64 {
    deadline.saturating_duration_since(Instant::now()).as_millis() as u64
}

fn execute(master: &Master, events: &Arc<dyn EventSink>, request: Request) -> Result<Response> {
    let response = match request {
        Request::CreateSession => {
            let (session, deadline) = master.create_session()?;
            Response::Session {
                session,
                lease_ms: remaining_ms(deadline),
            }
        }
        Request::Keepalive { session } => Response::Lease {
            lease_ms: remaining_ms(master.keepalive(session)?),
        },
        Request::DestroySession { session } => {
            master.destroy_session(session)?;
            Response::Ok
        }
        Request::Open {
            session,
            path,
            flags,
            event_mask,
        } => Response::Handle {
            handle: master.open(
                session,
                &path,
                OpenFlags::from_bits(flags),
                EventMask::from_bits(event_mask),
                Arc::clone(events),
            )?,
        },
        Request::Close { session, handle } => {
            master.close(session, handle)?;
            Response::Ok
        }
        Request::Mkdir { session, path } => {
            master.mkdir(session, &path)?;
            Response::Ok
        }
        Request::Delete { session, path } => {
            master.delete(session, &path)?;
            Response::Ok
        }
        Request::Exists { session, path } => Response::Bool(master.exists(session, &path)?),
        Request::Readdir { session, handle } => Response::Names(master.readdir(session, handle)?),
        Request::AttrSet {
            session,
            handle,
            name,
            value,
        } => {
            master.attr_set(session, handle, &name, &value)?;
            Response::Ok
        }
        Request::AttrGet {
            session,
            handle,
            name,
        } => Response::Value(master.attr_get(session, handle, &name)?),
        Request::AttrDel {
            session,
            handle,
            name,
        } => {
            master.attr_del(session, handle, &name)?;
            Response::Ok
        }
        Request::AttrExists {
            session,
            handle,
            name,
        } => Response::Bool(master.attr_exists(session, handle, &name)?),
        Request::AttrList { session, handle } => {
            Response::Names(master.attr_list(session, handle)?)
        }
        Request::Lock {
            session,
            handle,
            mode,
        } => Response::Lock(master.lock(session, handle, mode)?),
        Request::TryLock {
            session,
            handle,
            mode,
        } => Response::Generation(master.try_lock(session, handle, mode)?),
        Request::Release { session, handle } => {
            master.release(session, handle)?;
            Response::Ok
        }
        Request::Status => {
            let status = master.status()?;
            Response::Status {
                nodes: status.nodes as u64,
                sessions: status.sessions as u64,
                handles: status.handles as u64,
            }
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::MemoryKvStore;
    use crate::session::LeaseConfig;
    use bytes::Bytes;

    fn master() -> Master {
        Master::new(LeaseConfig::default(), Arc::new(MemoryKvStore::new()))
    }

    fn call(master: &Master, events: &Arc<dyn EventSink>, request: Request) -> Response {
        let frame = encode_request(1, &request).unwrap();
        decode_response(&handle_frame(master, events, &frame).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_request_reaches_master() {
        let master = master();
        let (tx, _rx) = mpsc::unbounded_channel();
        let events: Arc<dyn EventSink> = Arc::new(ConnectionSink::new(tx));

        let session = match call(&master, &events, Request::CreateSession) {
            Response::Session { session, lease_ms } => {
                assert!(lease_ms > 0);
                session
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            call(&master, &events, Request::Mkdir { session, path: "/dir".into() }),
            Response::Ok
        );
        assert_eq!(
            call(&master, &events, Request::Exists { session, path: "/dir".into() }),
            Response::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_malformed_request_answered_without_touching_master() {
        let master = master();
        let (tx, _rx) = mpsc::unbounded_channel();
        let events: Arc<dyn EventSink> = Arc::new(ConnectionSink::new(tx));

        let frame = Frame {
            kind: FrameKind::Request,
            opcode: Opcode::CreateSession as u16,
            request_id: 42,
            payload: Bytes::from_static(&[0xff, 0xff, 0xff]),
        };
        let response = handle_frame(&master, &events, &frame).unwrap();
        assert_eq!(response.request_id, 42);
        match decode_response(&response).unwrap() {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::Protocol),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(master.status().unwrap().sessions, 0);
    }

    #[tokio::test]
    async fn test_master_errors_become_error_responses() {
        let master = master();
        let (tx, _rx) = mpsc::unbounded_channel();
        let events: Arc<dyn EventSink> = Arc::new(ConnectionSink::new(tx));

        let session = master.create_session().unwrap().0;
        let request = Request::Close {
            session,
            handle: HandleId::new(99),
        };
        match call(&master, &events, request) {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::BadHandle),
            other => panic!("unexpected {:?}", other),
        }
        let request = Request::Close {
            session: SessionId::new(7),
            handle: HandleId::new(99),
        };
        match call(&master, &events, request) {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::NoSuchSession),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_sink_frames_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ConnectionSink::new(tx);
        sink.deliver(HandleId::new(4), Notification::LockAcquired)
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        let message = decode_event(&frame).unwrap();
        assert_eq!(message.handle, HandleId::new(4));
        assert_eq!(message.notification, Notification::LockAcquired);

        drop(rx);
        assert!(sink
            .deliver(HandleId::new(4), Notification::LockReleased)
            .await
            .is_err());
    }
}
