//! Shared-secret check.

use axum::{
    body::Body,
    http::{HeaderName, Request},
};
use futures_util::future::BoxFuture;

use crate::filters::{not_found, Filter, FilterError, FilterResult, Next};
use crate::http::context::RequestContext;

/// Admits a request only if it carries the configured token in the
/// configured header. The header is removed before the request moves on,
/// so it never reaches a target.
#[derive(Debug, Clone)]
pub struct TokenFilter {
    header: HeaderName,
    token: String,
}

impl TokenFilter {
    pub fn new(header: &str, token: &str) -> Result<Self, FilterError> {
        if token.is_empty() {
            return Err(FilterError::EmptyToken);
        }
        Ok(Self {
            header: parse_header_name(header)?,
            token: token.to_string(),
        })
    }

    fn accepts(&self, req: &Request<Body>) -> bool {
        req.headers()
            .get(&self.header)
            .is_some_and(|value| value.as_bytes() == self.token.as_bytes())
    }
}

impl Filter for TokenFilter {
    fn name(&self) -> &'static str {
        "token"
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut req: Request<Body>,
        next: Next<'a>,
    ) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            if !self.accepts(&req) {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    peer_addr = %ctx.connection().peer_addr(),
                    method = %req.method(),
                    "Missing or invalid token"
                );
                return Ok(not_found());
            }

            req.headers_mut().remove(&self.header);
            next.run(ctx, req).await
        })
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, FilterError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| FilterError::InvalidHeaderName(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::testing::{request, Recorder};
    use crate::filters::Pipeline;
    use crate::http::context::test_context;
    use axum::http::StatusCode;
    use std::sync::Arc;

    const HEADER: &str = "X-Lantern-Auth-Token";

    fn pipeline(recorder: &Arc<Recorder>) -> Pipeline {
        Pipeline::builder()
            .filter(TokenFilter::new(HEADER, "secret").unwrap())
            .endpoint(recorder.clone())
    }

    #[test]
    fn rejects_bad_configuration() {
        assert_eq!(TokenFilter::new(HEADER, "").err(), Some(FilterError::EmptyToken));
        assert!(matches!(
            TokenFilter::new("bad header", "secret"),
            Err(FilterError::InvalidHeaderName(_))
        ));
    }

    #[tokio::test]
    async fn missing_token_is_not_found() {
        let recorder = Arc::new(Recorder::default());
        let response = pipeline(&recorder)
            .run(&mut test_context(), request("GET", "http://example.com/", &[]))
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_token_is_not_found() {
        let recorder = Arc::new(Recorder::default());
        let response = pipeline(&recorder)
            .run(
                &mut test_context(),
                request("CONNECT", "example.com:443", &[(HEADER, "guess")]),
            )
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn valid_token_passes_and_is_stripped() {
        let recorder = Arc::new(Recorder::default());
        let response = pipeline(&recorder)
            .run(
                &mut test_context(),
                request("GET", "/", &[(HEADER, "secret"), ("Accept", "*/*")]),
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let seen = recorder.seen.lock().unwrap();
        assert!(seen[0].headers().get(HEADER).is_none());
        assert_eq!(seen[0].headers()["accept"], "*/*");
    }

    #[tokio::test]
    async fn header_lookup_is_case_insensitive() {
        let recorder = Arc::new(Recorder::default());
        let response = pipeline(&recorder)
            .run(
                &mut test_context(),
                request("GET", "/", &[("x-lantern-auth-token", "secret")]),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
