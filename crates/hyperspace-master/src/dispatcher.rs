//! Asynchronous delivery of notifications to handle callbacks.
//!
//! The master enqueues events without waiting. A router task owns one
//! delivery lane per handle, spawned on the handle's first event, so events
//! for one handle reach its callback in enqueue order while a slow callback
//! only delays its own handle. Failed deliveries are logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{EventMask, HandleId, NodeId};

/// What happened, as seen by one handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// Attribute `name` was set on the handle's node.
    AttrSet(String),
    /// Attribute `name` was deleted from the handle's node.
    AttrDel(String),
    /// Child `name` was created under the handle's node.
    ChildNodeAdded(String),
    /// Child `name` was removed from the handle's node.
    ChildNodeRemoved(String),
    /// The handle now holds the node's lock.
    LockAcquired,
    /// The handle no longer holds the node's lock.
    LockReleased,
}

impl Notification {
    /// Interest bit a handle needs to receive this notification.
    pub fn mask(&self) -> EventMask {
        match self {
            Notification::AttrSet(_) => EventMask::ATTR_SET,
            Notification::AttrDel(_) => EventMask::ATTR_DEL,
            Notification::ChildNodeAdded(_) => EventMask::CHILD_NODE_ADDED,
            Notification::ChildNodeRemoved(_) => EventMask::CHILD_NODE_REMOVED,
            Notification::LockAcquired => EventMask::LOCK_ACQUIRED,
            Notification::LockReleased => EventMask::LOCK_RELEASED,
        }
    }
}

/// A notification addressed to one handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Target handle.
    pub handle: HandleId,
    /// Node the event concerns.
    pub node: NodeId,
    /// Event payload.
    pub notification: Notification,
}

/// The callback could not be reached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("callback unreachable: {0}")]
pub struct DeliveryError(pub String);

/// Client callback target supplied when a handle is opened.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one notification for `handle`.
    async fn deliver(
        &self,
        handle: HandleId,
        notification: Notification,
    ) -> std::result::Result<(), DeliveryError>;
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    draining: AtomicU64,
}

impl DispatchStats {
    /// Events handed to a callback successfully.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events dropped because the callback failed or the dispatcher was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Retired lanes the router is still tracking.
    pub fn draining(&self) -> u64 {
        self.draining.load(Ordering::Relaxed)
    }
}

enum Command {
    Deliver(Event, Arc<dyn EventSink>),
    Retire(HandleId),
    Flush(oneshot::Sender<()>),
}

enum LaneItem {
    Event(Notification),
    Barrier(oneshot::Sender<()>),
}

/// Handle to the delivery router.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Starts the router task on the current runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(DispatchStats::default());
        let task = tokio::spawn(route(rx, stats.clone()));
        (Self { tx, stats }, task)
    }

    /// Queues an event for delivery. Never blocks.
    pub fn enqueue(&self, event: Event, sink: Arc<dyn EventSink>) {
        if self.tx.send(Command::Deliver(event, sink)).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("dispatcher stopped, event dropped");
        }
    }

    /// Ends a handle's lane once its queued events have drained.
    pub fn retire(&self, handle: HandleId) {
        let _ = self.tx.send(Command::Retire(handle));
    }

    /// Resolves once every event enqueued before the call was delivered or dropped.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Delivery counters.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

async fn route(mut rx: mpsc::UnboundedReceiver<Command>, stats: Arc<DispatchStats>) {
    let mut lanes: HashMap<HandleId, mpsc::UnboundedSender<LaneItem>> = HashMap::new();
    // barriers of retired lanes; a resolved one means the lane has exited
    let mut draining: Vec<oneshot::Receiver<()>> = Vec::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver(event, sink) => {
                let lane = lanes.entry(event.handle).or_insert_with(|| {
                    let (lane_tx, lane_rx) = mpsc::unbounded_channel();
                    tokio::spawn(run_lane(event.handle, sink, lane_rx, stats.clone()));
                    lane_tx
                });
                if lane.send(LaneItem::Event(event.notification)).is_err() {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Command::Retire(handle) => {
                draining.retain_mut(|rx| matches!(rx.try_recv(), Err(TryRecvError::Empty)));
                if let Some(lane) = lanes.remove(&handle) {
                    let (tx, rx) = oneshot::channel();
                    if lane.send(LaneItem::Barrier(tx)).is_ok() {
                        draining.push(rx);
                    }
                }
                stats.draining.store(draining.len() as u64, Ordering::Relaxed);
            }
            Command::Flush(done) => {
                let mut waits = std::mem::take(&mut draining);
                stats.draining.store(0, Ordering::Relaxed);
                for lane in lanes.values() {
                    let (tx, rx) = oneshot::channel();
                    if lane.send(LaneItem::Barrier(tx)).is_ok() {
                        waits.push(rx);
                    }
                }
                tokio::spawn(async move {
                    futures::future::join_all(waits).await;
                    let _ = done.send(());
                });
            }
        }
    }
    debug!("dispatcher router stopped");
}

async fn run_lane(
    handle: HandleId,
    sink: Arc<dyn EventSink>,
    mut rx: mpsc::UnboundedReceiver<LaneItem>,
    stats: Arc<DispatchStats>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            LaneItem::Event(notification) => match sink.deliver(handle, notification).await {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(handle = %handle, error = %e, "event delivery failed, dropping");
                }
            },
            LaneItem::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}
