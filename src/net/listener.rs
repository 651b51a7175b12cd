//! TCP listener with connection admission control.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Track the live connection count from lifecycle events
//! - Pause accepting at the cap, resume once a connection closes
//! - Let shutdown wait until the last connection is gone
//!
//! While paused, `accept` simply does not call into the socket, so new
//! clients wait in the kernel's listen backlog instead of being dropped.
//!
//! ```text
//!            live >= cap
//!   Running ────────────▶ Paused
//!      ▲                    │
//!      └────────────────────┘
//!            live < cap
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::net::connection::ConnectionState;
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The configured address does not parse.
    #[error("Invalid listen address {0:?}")]
    InvalidAddress(String),
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
}

/// Whether the listener currently offers new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    Running,
    Paused,
}

/// The shared concurrency budget.
///
/// The live counter is updated atomically by every connection's lifecycle
/// events. State transitions are decided while holding the watch channel's
/// write lock and always against the latest counter value, so concurrent
/// updates cannot leave the listener paused below the cap.
#[derive(Debug)]
pub struct AdmissionBudget {
    cap: Option<u64>,
    live: AtomicU64,
    state: watch::Sender<AdmissionState>,
    published: watch::Sender<u64>,
}

impl AdmissionBudget {
    /// Create a budget. A `max_connections` of zero means unbounded.
    pub fn new(max_connections: usize) -> Self {
        let (state, _) = watch::channel(AdmissionState::Running);
        let (published, _) = watch::channel(0);
        Self {
            cap: (max_connections > 0).then_some(max_connections as u64),
            live: AtomicU64::new(0),
            state,
            published,
        }
    }

    /// Apply a lifecycle event and return the transition it caused, if any.
    ///
    /// `New` counts up, `Closed` counts down (never below zero), `Active`
    /// leaves the count alone.
    pub fn on_connection_state(&self, event: ConnectionState) -> Option<AdmissionState> {
        match event {
            ConnectionState::New => {
                self.live.fetch_add(1, Ordering::SeqCst);
            }
            ConnectionState::Closed => {
                let _ = self
                    .live
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        Some(n.saturating_sub(1))
                    });
            }
            ConnectionState::Active => return None,
        }
        self.published
            .send_modify(|published| *published = self.live.load(Ordering::SeqCst));
        metrics::set_active_connections(self.live_count());
        self.reconcile()
    }

    fn reconcile(&self) -> Option<AdmissionState> {
        let cap = self.cap?;
        let mut transition = None;
        self.state.send_if_modified(|state| {
            let live = self.live.load(Ordering::SeqCst);
            let next = match *state {
                AdmissionState::Running if live >= cap => AdmissionState::Paused,
                AdmissionState::Paused if live < cap => AdmissionState::Running,
                _ => return false,
            };
            *state = next;
            transition = Some(next);
            true
        });

        match transition {
            Some(AdmissionState::Paused) => {
                tracing::info!(max_connections = cap, "Connection cap reached, pausing accept");
                metrics::set_admission_paused(true);
            }
            Some(AdmissionState::Running) => {
                tracing::info!(max_connections = cap, "Below connection cap, resuming accept");
                metrics::set_admission_paused(false);
            }
            None => {}
        }
        transition
    }

    /// Current live connection count.
    pub fn live_count(&self) -> u64 {
        self.live.load(Ordering::SeqCst)
    }

    /// Configured cap, `None` when unbounded.
    pub fn cap(&self) -> Option<u64> {
        self.cap
    }

    pub fn state(&self) -> AdmissionState {
        *self.state.borrow()
    }

    /// Resolve once the budget is in the `Running` state.
    pub async fn wait_running(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|state| *state == AdmissionState::Running).await;
    }

    /// Resolve once no connection holds a permit.
    pub async fn wait_drained(&self) {
        let mut rx = self.published.subscribe();
        let _ = rx.wait_for(|live| *live == 0).await;
    }
}

/// A connection's claim on the admission budget.
///
/// Creating one reports `New`; dropping it reports `Closed`. This keeps the
/// count exact even if the connection task panics.
#[derive(Debug)]
pub struct AdmissionPermit {
    budget: Arc<AdmissionBudget>,
}

impl AdmissionPermit {
    pub fn new(budget: Arc<AdmissionBudget>) -> Self {
        budget.on_connection_state(ConnectionState::New);
        Self { budget }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.budget.on_connection_state(ConnectionState::Closed);
    }
}

/// A TCP listener whose accept is gated by an [`AdmissionBudget`].
pub struct AdmissionListener {
    inner: TcpListener,
    budget: Arc<AdmissionBudget>,
}

impl AdmissionListener {
    /// Bind to `address` with the given cap (zero for unbounded).
    pub async fn bind(address: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| ListenerError::InvalidAddress(address.to_string()))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Self::from_listener(listener, max_connections)
    }

    /// Wrap an already bound listener.
    pub fn from_listener(
        listener: TcpListener,
        max_connections: usize,
    ) -> Result<Self, ListenerError> {
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            budget: Arc::new(AdmissionBudget::new(max_connections)),
        })
    }

    /// Accept a new connection, waiting first while the budget is paused.
    ///
    /// The returned permit must live as long as the connection does.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, AdmissionPermit), ListenerError> {
        self.budget.wait_running().await;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let permit = AdmissionPermit::new(self.budget.clone());

        tracing::debug!(
            peer_addr = %addr,
            live_connections = self.budget.live_count(),
            "Connection accepted"
        );

        Ok((stream, addr, permit))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// The shared budget, for observing state from outside the accept loop.
    pub fn budget(&self) -> Arc<AdmissionBudget> {
        self.budget.clone()
    }
}
