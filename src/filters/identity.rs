//! Client identity extraction.

use std::fmt;

use axum::{
    body::Body,
    http::{HeaderName, Request},
};
use futures_util::future::BoxFuture;

use crate::filters::token::parse_header_name;
use crate::filters::{not_found, Filter, FilterError, FilterResult, Next};
use crate::http::context::RequestContext;

/// Opaque client identifier taken from the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requires a non-empty client id header, records it in the context as a
/// [`ClientId`], and strips the header from the request.
#[derive(Debug, Clone)]
pub struct IdentityFilter {
    header: HeaderName,
}

impl IdentityFilter {
    pub fn new(header: &str) -> Result<Self, FilterError> {
        Ok(Self {
            header: parse_header_name(header)?,
        })
    }
}

impl Filter for IdentityFilter {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut req: Request<Body>,
        next: Next<'a>,
    ) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            let client_id = req
                .headers()
                .get(&self.header)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ClientId::new);

            let Some(client_id) = client_id else {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    peer_addr = %ctx.connection().peer_addr(),
                    "Missing client id"
                );
                return Ok(not_found());
            };

            tracing::trace!(request_id = %ctx.request_id(), client_id = %client_id, "Client identified");
            req.headers_mut().remove(&self.header);
            ctx.insert(client_id);
            next.run(ctx, req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::testing::{request, Recorder};
    use crate::filters::Pipeline;
    use crate::http::context::test_context;
    use axum::http::StatusCode;
    use std::sync::Arc;

    const HEADER: &str = "X-Lantern-UID";

    fn pipeline(recorder: &Arc<Recorder>) -> Pipeline {
        Pipeline::builder()
            .filter(IdentityFilter::new(HEADER).unwrap())
            .endpoint(recorder.clone())
    }

    #[tokio::test]
    async fn missing_or_blank_id_is_not_found() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = pipeline(&recorder);

        let response = pipeline
            .run(&mut test_context(), request("GET", "/", &[]))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = pipeline
            .run(&mut test_context(), request("GET", "/", &[(HEADER, "   ")]))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_id_and_strips_header() {
        let recorder = Arc::new(Recorder::default());
        let response = pipeline(&recorder)
            .run(
                &mut test_context(),
                request("CONNECT", "example.com:443", &[(HEADER, "device-42")]),
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            recorder.client_ids.lock().unwrap()[0],
            Some(ClientId::new("device-42"))
        );
        assert!(recorder.seen.lock().unwrap()[0].headers().get(HEADER).is_none());
    }
}
