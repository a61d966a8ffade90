//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use hyperspace_master::protocol::{
    decode_event, decode_response, encode_request, EventMessage, Frame, FrameCodec, FrameKind,
    Request, Response,
};
use hyperspace_master::{
    DeliveryError, EventMask, EventSink, HandleId, LeaseConfig, Master, MemoryKvStore,
    Notification, OpenFlags, SessionId,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Event callback that records every notification it receives.
#[derive(Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<(HandleId, Notification)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Notifications delivered to `handle`, in delivery order.
    pub fn for_handle(&self, handle: HandleId) -> Vec<Notification> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| *h == handle)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(
        &self,
        handle: HandleId,
        notification: Notification,
    ) -> Result<(), DeliveryError> {
        self.seen.lock().unwrap().push((handle, notification));
        Ok(())
    }
}

/// Master with default lease timing and an in-memory store.
pub fn new_master() -> Arc<Master> {
    Arc::new(Master::new(
        LeaseConfig::default(),
        Arc::new(MemoryKvStore::new()),
    ))
}

/// Master with short leases for timing tests.
pub fn master_with_lease(lease_ms: u64, grace_ms: u64) -> Arc<Master> {
    Arc::new(Master::new(
        LeaseConfig {
            lease_interval: Duration::from_millis(lease_ms),
            grace_period: Duration::from_millis(grace_ms),
        },
        Arc::new(MemoryKvStore::new()),
    ))
}

pub fn session(master: &Master) -> SessionId {
    master.create_session().unwrap().0
}

/// Opens `path`, creating it if needed, subscribed to every event.
pub fn open(master: &Master, session: SessionId, path: &str, sink: &Arc<RecordingSink>) -> HandleId {
    master
        .open(session, path, OpenFlags::CREATE, EventMask::ALL, sink.clone())
        .unwrap()
}

/// Minimal protocol client for end-to-end tests.
pub struct WireClient {
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    next_id: u64,
    events: Vec<EventMessage>,
}

impl WireClient {
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            reader: FramedRead::new(read, FrameCodec::new(1 << 20)),
            writer: FramedWrite::new(write, FrameCodec::new(1 << 20)),
            next_id: 1,
            events: Vec::new(),
        }
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        self.writer.send(frame).await.unwrap();
    }

    /// Reads frames until the response to `request_id`, keeping events aside.
    pub async fn response_to(&mut self, request_id: u64) -> Response {
        loop {
            let frame = self.reader.next().await.unwrap().unwrap();
            match frame.kind {
                FrameKind::Event => self.events.push(decode_event(&frame).unwrap()),
                FrameKind::Response => {
                    assert_eq!(frame.request_id, request_id);
                    return decode_response(&frame).unwrap();
                }
                FrameKind::Request => panic!("server sent a request frame"),
            }
        }
    }

    pub async fn call(&mut self, request: Request) -> Response {
        let id = self.next_id;
        self.next_id += 1;
        self.send_frame(encode_request(id, &request).unwrap()).await;
        self.response_to(id).await
    }

    /// Next event, waiting for one if none is buffered.
    pub async fn next_event(&mut self) -> EventMessage {
        if !self.events.is_empty() {
            return self.events.remove(0);
        }
        let frame = tokio::time::timeout(Duration::from_secs(5), self.reader.next())
            .await
            .expect("no event within timeout")
            .unwrap()
            .unwrap();
        decode_event(&frame).unwrap()
    }
}
