//! Port allow-list for CONNECT tunnels.

use std::collections::BTreeSet;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::IntoResponse,
};
use futures_util::future::BoxFuture;

use crate::filters::{Filter, FilterError, FilterResult, Next};
use crate::http::context::RequestContext;
use crate::proxy::request_authority;

/// Restricts CONNECT targets to a set of ports.
///
/// Other methods pass untouched. A CONNECT whose target has no usable port
/// gets 400; one whose port is not listed gets 403.
#[derive(Debug, Clone)]
pub struct ConnectPortsFilter {
    allowed: BTreeSet<u16>,
}

impl ConnectPortsFilter {
    pub fn new(allowed: impl IntoIterator<Item = u16>) -> Result<Self, FilterError> {
        let allowed: BTreeSet<u16> = allowed.into_iter().collect();
        if allowed.contains(&0) {
            return Err(FilterError::ZeroPort);
        }
        Ok(Self { allowed })
    }
}

impl Filter for ConnectPortsFilter {
    fn name(&self) -> &'static str {
        "connect_ports"
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        req: Request<Body>,
        next: Next<'a>,
    ) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            if req.method() != Method::CONNECT || self.allowed.is_empty() {
                return next.run(ctx, req).await;
            }

            let Some(port) = request_authority(&req).and_then(|a| a.port_u16()) else {
                tracing::debug!(request_id = %ctx.request_id(), "CONNECT target has no port");
                return Ok(StatusCode::BAD_REQUEST.into_response());
            };

            if !self.allowed.contains(&port) {
                tracing::debug!(request_id = %ctx.request_id(), port, "CONNECT port not allowed");
                return Ok(StatusCode::FORBIDDEN.into_response());
            }

            next.run(ctx, req).await
        })
    }
}
