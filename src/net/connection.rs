//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Name the lifecycle states the admission budget observes
//! - Carry per-connection facts into every request served on it

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::net::listener::AdmissionPermit;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle as reported by the serving loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, nothing read yet.
    New,
    /// Serving a request or carrying a tunnel.
    Active,
    /// Fully terminated.
    Closed,
}

/// Facts about an accepted connection, shared by every request it carries.
///
/// Holding a clone keeps the connection counted against the admission
/// budget; the last clone to drop reports it closed. A CONNECT tunnel takes
/// a clone along when it outlives the HTTP exchange that opened it.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    id: ConnectionId,
    peer_addr: SocketAddr,
    accepted_at: Instant,
    tls: bool,
    _permit: Arc<AdmissionPermit>,
}

impl ConnectionInfo {
    pub fn new(peer_addr: SocketAddr, tls: bool, permit: AdmissionPermit) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            accepted_at: Instant::now(),
            tls,
            _permit: Arc::new(permit),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    /// Whether the client reached us over a TLS-terminating listener.
    pub fn is_tls(&self) -> bool {
        self.tls
    }
}
