//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → open connections and tunnels finish
//!     on their own → process exits
//! ```
//!
//! # Design Decisions
//! - Stopping the accept loop never cuts live tunnels short
//! - A trigger with no subscribers is not an error

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
