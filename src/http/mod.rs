//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (hyper HTTP/1.1 with upgrades, one task per connection)
//!     → context.rs (fresh RequestContext per request)
//!     → filters::Pipeline
//!     → Response written back, or the socket handed to a tunnel
//! ```

pub mod context;
pub mod server;

pub use context::RequestContext;
pub use server::{ProxyServer, ServerError};
