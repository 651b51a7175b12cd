//! CONNECT tunnel data plane.
//!
//! # Data Flow
//! ```text
//! client ──read──▶ pump ──write──▶ target
//! client ◀─write── pump ◀──read─── target
//!                   │
//!           first to stop fires
//!             the CloseGuard
//! ```
//!
//! # Design Decisions
//! - Byte-transparent: no framing, no inspection
//! - Idle timeout is the only cancellation trigger
//! - Relay I/O errors end the tunnel but are not server failures

pub mod guard;
pub mod relay;

pub use guard::{CloseCause, CloseGuard, Side};
pub use relay::{RelayStats, TunnelSession};
