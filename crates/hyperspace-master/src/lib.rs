#![warn(missing_docs)]

//! Hyperspace master: hierarchical namespace, advisory locks, client
//! sessions with leases, and event notification for a coordination service.

pub mod config;
pub mod dispatcher;
pub mod handle;
pub mod kvstore;
pub mod lock;
pub mod master;
pub mod namespace;
pub mod protocol;
pub mod server;
pub mod session;
pub mod types;

pub use config::MasterConfig;
pub use dispatcher::{DeliveryError, EventSink, Notification};
pub use kvstore::{KvStore, MemoryKvStore};
pub use master::{LockInfo, Master, MasterStatus};
pub use session::{LeaseConfig, SessionState};
pub use types::*;
