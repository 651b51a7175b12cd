//! Terminal proxying stage.
//!
//! # Data Flow
//! ```text
//! Request that passed every filter
//!     → dispatch.rs (CONNECT or not?)
//!         → connect.rs (200, hijack, dial, hand off to tunnel::TunnelSession)
//!         → forward.rs (rebuild URI, strip hop-by-hop, one upstream exchange)
//! ```
//!
//! # Design Decisions
//! - CONNECT answers 200 before dialing; a failed dial closes the client
//! - Direct forwarding speaks plain HTTP only; TLS targets go through CONNECT
//! - Every request-time fault is a `ProxyError`, rendered once by the pipeline
//!   as a bare status; the detail only goes to the log

pub mod connect;
pub mod dispatch;
pub mod forward;

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, uri::Authority, HeaderMap, HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
};

pub use connect::ConnectHandler;
pub use dispatch::Dispatcher;
pub use forward::Forwarder;

/// Errors raised while proxying a request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Neither the request target nor the Host header names a destination.
    #[error("request does not name a target")]
    MissingTarget,
    /// The destination can only be reached over TLS.
    #[error("target {0} requires TLS, use CONNECT")]
    TlsTarget(String),
    /// The upstream exchange failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    /// The upstream did not answer in time.
    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingTarget => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        empty_response(self.status())
    }
}

/// Headers scoped to a single connection, never forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHORIZATION,
    header::PROXY_AUTHENTICATE,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// The destination a request names: the request-target's authority, or the
/// Host header when the target is in origin form.
pub(crate) fn request_authority<B>(req: &Request<B>) -> Option<Authority> {
    if let Some(authority) = req.uri().authority() {
        return Some(authority.clone());
    }
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(|host| host.parse::<Authority>().ok())
}

pub(crate) fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
