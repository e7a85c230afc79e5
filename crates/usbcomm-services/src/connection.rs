//! Connection management: per-client state machine and pending transfer state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;

use usbcomm_core::wire::Endpoint;

use crate::assemble::Assembler;
use crate::capability::Capability;
use crate::staging::WriteStaging;

/// Opaque handle naming one client connection.
pub type ConnectionId = u64;

/// `Disconnected → Connected → InterfaceOpen → Closed`.
/// Closing the interface returns to `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Disconnected,
    Connected,
    InterfaceOpen,
    Closed,
}

/// Which kind of user client connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// Only checks that the driver is present. Cannot open the interface.
    DriverDetection,
    UsbClient,
}

/// Mutable per-connection state. Never held across an await.
#[derive(Debug)]
pub(crate) struct ConnectionInner {
    pub state: ConnState,
    pub kind: Option<ClientKind>,
    pub control: Option<Capability>,
    pub interrupt: Option<Capability>,
    pub staging: WriteStaging,
    next_read_index: u8,
}

impl ConnectionInner {
    pub fn capability(&self, endpoint: Endpoint) -> Option<Capability> {
        match endpoint {
            Endpoint::Control => self.control,
            Endpoint::Interrupt => self.interrupt,
        }
    }

    pub fn set_capability(&mut self, capability: Capability) {
        match capability.endpoint {
            Endpoint::Control => self.control = Some(capability),
            Endpoint::Interrupt => self.interrupt = Some(capability),
        }
    }

    pub fn allocate_read_index(&mut self) -> u8 {
        let index = self.next_read_index;
        self.next_read_index = self.next_read_index.wrapping_add(1);
        index
    }
}

/// One client connection.
pub struct Connection {
    pub id: ConnectionId,
    pub attached_at: Instant,
    inner: Mutex<ConnectionInner>,
    /// Read-path reassembly for this connection.
    pub(crate) assembler: Assembler,
    /// Orders ordinary actions. Release actions do not take it.
    pub(crate) serial: tokio::sync::Mutex<()>,
    pub(crate) read_cancel: Notify,
    pub(crate) write_cancel: Notify,
}

impl Connection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            attached_at: Instant::now(),
            inner: Mutex::new(ConnectionInner {
                state: ConnState::Disconnected,
                kind: None,
                control: None,
                interrupt: None,
                staging: WriteStaging::new(),
                next_read_index: 0,
            }),
            assembler: Assembler::new(),
            serial: tokio::sync::Mutex::new(()),
            read_cancel: Notify::new(),
            write_cancel: Notify::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnState {
        self.lock().state
    }

    pub fn kind(&self) -> Option<ClientKind> {
        self.lock().kind
    }

    pub fn capability(&self, endpoint: Endpoint) -> Option<Capability> {
        self.lock().capability(endpoint)
    }

    pub fn pending_writes(&self) -> usize {
        self.lock().staging.pending()
    }

    pub fn pending_reads(&self) -> usize {
        self.assembler.in_progress().len()
    }

    /// Drop staged writes and wake an in-flight write. Returns transfers dropped.
    pub(crate) fn release_writes(&self) -> usize {
        self.write_cancel.notify_waiters();
        self.lock().staging.clear()
    }

    /// Drop partial reads and wake an in-flight read. Returns transfers dropped.
    pub(crate) fn release_reads(&self) -> usize {
        self.read_cancel.notify_waiters();
        self.assembler.clear()
    }
}

/// The connection table, shared across all tasks.
pub type ConnectionTable = Arc<DashMap<ConnectionId, Arc<Connection>>>;

/// Create a new empty connection table.
pub fn new_connection_table() -> ConnectionTable {
    Arc::new(DashMap::new())
}

/// Hands out connection ids. 0 is never issued.
#[derive(Debug, Default)]
pub struct ConnectionIds(AtomicU64);

impl ConnectionIds {
    pub fn next(&self) -> ConnectionId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
