//! Connection bookkeeping and the disconnect path.
//!
//! Disconnects are detected on the network tasks, which only ever call
//! [`ConnectionHandle::close`]. Closing fires the [`DisconnectNotifier`] subscribers once, and the
//! server's subscriber pushes the id into the [`DisconnectQueue`]. The simulation thread drains
//! that queue once per tick and performs all teardown itself, so world and session state are
//! never touched from an I/O thread.
//!
//! The [`ConnectionRegistry`] is owned by the simulation thread and tracks every accepted
//! connection, its optional unreliable port and the game tick of its last activity.

use log::{info, warn};
use shared::ServerPacket;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{mpsc, Notify};

pub type ConnectionId = u64;

pub type DisconnectCallback = Arc<dyn Fn(ConnectionId) + Send + Sync>;

/// Observers of connection closes.
///
/// Subscribers run in registration order on whichever thread closed the connection. Dispatch works
/// on a snapshot of the list, so a subscriber may subscribe further callbacks; they are called from
/// the next notification on.
#[derive(Default)]
pub struct DisconnectNotifier {
    subscribers: RwLock<Vec<DisconnectCallback>>,
}

impl DisconnectNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: DisconnectCallback) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub fn notify(&self, id: ConnectionId) {
        let snapshot: Vec<DisconnectCallback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for callback in snapshot {
            callback(id);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DisconnectNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisconnectNotifier")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[derive(Debug)]
struct CloseState {
    closed: AtomicBool,
    signal: Notify,
    notifier: Arc<DisconnectNotifier>,
}

/// A cheap, cloneable handle to one client connection.
///
/// Outgoing payloads are queued on an unbounded channel drained by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    state: Arc<CloseState>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        notifier: Arc<DisconnectNotifier>,
    ) -> Self {
        Self {
            id,
            addr,
            outbound,
            state: Arc::new(CloseState {
                closed: AtomicBool::new(false),
                signal: Notify::new(),
                notifier,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Queues an already encoded payload. Returns false if the connection is closed.
    pub fn send_raw(&self, payload: Vec<u8>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.send(payload).is_ok()
    }

    pub fn send(&self, packet: &ServerPacket) -> bool {
        match packet.encode() {
            Ok(payload) => self.send_raw(payload),
            Err(e) => {
                warn!(
                    "Dropping {:?} to connection {}: {}",
                    packet.id(),
                    self.id,
                    e
                );
                false
            }
        }
    }

    /// Marks the connection closed, wakes its I/O tasks and notifies disconnect subscribers.
    /// Only the first call has any effect.
    pub fn close(&self) -> bool {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.state.signal.notify_waiters();
        self.state.notifier.notify(self.id);
        true
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        loop {
            let notified = self.state.signal.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    order: VecDeque<ConnectionId>,
    queued: HashSet<ConnectionId>,
}

/// Connections that closed since the last drain.
///
/// Filled from I/O threads, drained by the simulation thread. A connection queued twice before a
/// drain is reported once.
#[derive(Debug, Default)]
pub struct DisconnectQueue {
    inner: Mutex<QueueInner>,
    pending: AtomicUsize,
}

impl DisconnectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already waiting to be drained.
    pub fn push(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.queued.insert(id) {
            return false;
        }
        inner.order.push_back(id);
        self.pending.fetch_add(1, Ordering::Release);
        true
    }

    pub fn drain(&self) -> Vec<ConnectionId> {
        // Nothing queued is the common case, and it takes no lock.
        if self.pending.load(Ordering::Acquire) == 0 {
            return Vec::new();
        }

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let drained: Vec<ConnectionId> = inner.order.drain(..).collect();
        inner.queued.clear();
        self.pending.fetch_sub(drained.len(), Ordering::Release);
        drained
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct Connection {
    pub handle: ConnectionHandle,
    /// Port of the client's unreliable channel, once it has told us
    pub unreliable_port: Option<u16>,
    /// Game tick of the last received message
    pub last_activity: u64,
}

/// Every accepted connection that has not been torn down yet.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Adds a freshly accepted connection. Connections that are already closed, duplicates and
    /// connections beyond capacity are refused.
    pub fn register(&mut self, handle: ConnectionHandle, now: u64) -> bool {
        if handle.is_closed() {
            info!(
                "Connection {} closed before it could be registered",
                handle.id()
            );
            return false;
        }
        if self.connections.contains_key(&handle.id()) {
            warn!("Connection {} registered twice", handle.id());
            return false;
        }
        if self.connections.len() >= self.max_connections {
            warn!(
                "Refusing connection {} from {}: server full",
                handle.id(),
                handle.addr()
            );
            return false;
        }

        info!("Connection {} from {}", handle.id(), handle.addr());
        self.connections.insert(
            handle.id(),
            Connection {
                handle,
                unreliable_port: None,
                last_activity: now,
            },
        );
        true
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn handle(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id).map(|connection| &connection.handle)
    }

    pub fn touch(&mut self, id: ConnectionId, now: u64) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) => {
                connection.last_activity = now;
                true
            }
            None => false,
        }
    }

    pub fn set_unreliable_port(&mut self, id: ConnectionId, port: u16) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) => {
                connection.unreliable_port = Some(port);
                true
            }
            None => false,
        }
    }

    /// Connections with no activity for longer than `timeout` milliseconds.
    pub fn idle(&self, now: u64, timeout: u64) -> Vec<ConnectionId> {
        let mut idle: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|connection| now.saturating_sub(connection.last_activity) > timeout)
            .map(|connection| connection.handle.id())
            .collect();
        idle.sort_unstable();
        idle
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
