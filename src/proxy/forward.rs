//! Direct (non-CONNECT) forwarding.
//!
//! # Responsibilities
//! - Rebuild an absolute `http://` URI from an origin-form target and Host
//! - Strip hop-by-hop headers in both directions
//! - Perform exactly one upstream exchange and stream the response back
//!
//! Any failure (dial, TLS-only target, timeout, malformed answer) becomes a
//! 500 through `ProxyError`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, uri::Scheme, HeaderMap, Request, Uri},
    response::Response,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::ForwardConfig;
use crate::filters::ClientId;
use crate::http::context::RequestContext;
use crate::observability::TrafficReporter;
use crate::proxy::{request_authority, strip_hop_by_hop, ProxyError};

pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    request_timeout: Duration,
    reporter: Arc<dyn TrafficReporter>,
}

impl Forwarder {
    pub fn new(config: &ForwardConfig, reporter: Arc<dyn TrafficReporter>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            request_timeout: config.request_timeout(),
            reporter,
        }
    }

    pub async fn handle(&self, ctx: &RequestContext, req: Request<Body>) -> Result<Response, ProxyError> {
        let uri = absolute_uri(&req)?;
        if uri.scheme() == Some(&Scheme::HTTPS) {
            return Err(ProxyError::TlsTarget(uri.to_string()));
        }

        tracing::debug!(
            request_id = %ctx.request_id(),
            method = %req.method(),
            uri = %uri,
            "Forwarding request"
        );

        let (mut parts, body) = req.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        parts.uri = uri;
        let request_bytes = content_length(&parts.headers);

        let response = tokio::time::timeout(
            self.request_timeout,
            self.client.request(Request::from_parts(parts, body)),
        )
        .await
        .map_err(|_| ProxyError::UpstreamTimeout(self.request_timeout))??;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        if let Some(client_id) = ctx.get::<ClientId>() {
            self.reporter.report(
                client_id.as_str(),
                request_bytes,
                content_length(&parts.headers),
            );
        }

        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// The URI to send upstream. Absolute targets are kept; origin-form targets
/// are joined with the Host header under `http://`.
fn absolute_uri<B>(req: &Request<B>) -> Result<Uri, ProxyError> {
    if req.uri().scheme().is_some() && req.uri().authority().is_some() {
        return Ok(req.uri().clone());
    }

    let authority = request_authority(req).ok_or(ProxyError::MissingTarget)?;
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|_| ProxyError::MissingTarget)
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str, host: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn origin_form_uses_host() {
        let uri = absolute_uri(&get("/a/b?c=d", Some("example.com:8080"))).unwrap();
        assert_eq!(uri.to_string(), "http://example.com:8080/a/b?c=d");
    }

    #[test]
    fn absolute_form_is_kept() {
        let uri = absolute_uri(&get("http://example.com/x", Some("ignored.example"))).unwrap();
        assert_eq!(uri.to_string(), "http://example.com/x");
    }

    #[test]
    fn no_host_is_missing_target() {
        assert!(matches!(
            absolute_uri(&get("/x", None)),
            Err(ProxyError::MissingTarget)
        ));
    }

    #[test]
    fn reads_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), 0);
        headers.insert(header::CONTENT_LENGTH, "26".parse().unwrap());
        assert_eq!(content_length(&headers), 26);
    }
}
