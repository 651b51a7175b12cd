//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (admission-gated accept, live connection budget)
//!     → tls.rs (optional TLS handshake, on the connection's own task)
//!     → connection.rs (identity, lifecycle, permit held until close)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     New → Active → Closed
//! ```
//!
//! # Design Decisions
//! - Paused listeners leave clients in the OS backlog, never drop them
//! - Each connection holds a permit; dropping it reports the close
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionState};
pub use listener::{AdmissionBudget, AdmissionListener, AdmissionPermit, AdmissionState, ListenerError};
