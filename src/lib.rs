//! Authenticating HTTP forward proxy.
//!
//! Clients present a shared token and a client id on every request. Accepted
//! CONNECT requests become raw byte tunnels with an idle timeout; everything
//! else is forwarded once to the plain-HTTP destination named by the request.
//! Failed authentication always looks like a plain 404.

pub mod config;
pub mod filters;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod tunnel;

pub use config::schema::ProxyConfig;
pub use http::{ProxyServer, ServerError};
pub use lifecycle::Shutdown;
