//! Connection table: the router's view of every open WebSocket.
//!
//! The router never touches a socket.  Each connection is represented by a
//! [`ConnectionHandle`] holding the sending half of a bounded channel; the
//! transport task owns the receiving half and writes whatever arrives to the
//! socket.
//!
//! # Backpressure (for beginners)
//!
//! Sends use [`mpsc::Sender::try_send`], which never waits.  If a slow
//! control panel lets its queue fill up, new messages for *that* panel are
//! dropped and everyone else keeps receiving frames at full speed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use relay_core::{ConnectionId, DeviceId, Role};

/// One outbound text frame, shared between every connection it goes to.
pub type Outbound = Arc<str>;

/// What happened to a single send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The connection's queue is full; the message was dropped.
    QueueFull,
    /// The transport task is gone; cleanup is already on its way.
    Closed,
    /// No connection with that id is registered.
    Unknown,
}

/// Totals for a fan-out to several connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub queued: usize,
    pub queue_full: usize,
}

/// The router-side half of one open connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Fixed at handshake time.
    pub role: Role,
    /// Device whose binary frames and pings this producer connection carries.
    pub device: Option<DeviceId>,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, role: Role, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            role,
            device: None,
            tx,
        }
    }

    /// Enqueues `msg` without waiting.
    pub fn try_send(&self, msg: &Outbound) -> SendOutcome {
        match self.tx.try_send(Arc::clone(msg)) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "outbound queue full; message dropped");
                SendOutcome::QueueFull
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = %self.id, "outbound queue closed");
                SendOutcome::Closed
            }
        }
    }
}

/// Every open connection, keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    handles: HashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ConnectionHandle) {
        self.handles.insert(handle.id, handle);
    }

    /// Removes a handle.  Returns `None` if it was already removed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.handles.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.handles.get(&id)
    }

    /// Records which device a producer connection speaks for.
    pub fn bind_device(&mut self, id: ConnectionId, device_id: DeviceId) -> bool {
        match self.handles.get_mut(&id) {
            Some(handle) => {
                handle.device = Some(device_id);
                true
            }
            None => false,
        }
    }

    /// Ids of every open observer connection.
    pub fn observers(&self) -> Vec<ConnectionId> {
        self.handles
            .values()
            .filter(|h| h.role == Role::Observer)
            .map(|h| h.id)
            .collect()
    }

    pub fn send(&self, id: ConnectionId, msg: &Outbound) -> SendOutcome {
        match self.handles.get(&id) {
            Some(handle) => handle.try_send(msg),
            None => SendOutcome::Unknown,
        }
    }

    pub fn send_many(&self, ids: &[ConnectionId], msg: &Outbound) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for &id in ids {
            match self.send(id, msg) {
                SendOutcome::Queued => report.queued += 1,
                SendOutcome::QueueFull => report.queue_full += 1,
                SendOutcome::Closed | SendOutcome::Unknown => {}
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
