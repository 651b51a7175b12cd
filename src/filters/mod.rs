//! Request policy filters and the pipeline that drives them.
//!
//! # Data Flow
//! ```text
//! Request + RequestContext
//!     → token.rs     (shared secret; 404 on mismatch, header stripped)
//!     → identity.rs  (client id; 404 when absent, header stripped)
//!     → tier.rs      (pro membership tag, never rejects)
//!     → ports.rs     (CONNECT port allow-list, when configured)
//!     → Endpoint     (proxy::Dispatcher: CONNECT tunnel or direct forward)
//! ```
//!
//! # Design Decisions
//! - The chain is an explicit list fixed at construction; `Next` is the
//!   remainder of that list, so order is visible and testable
//! - A filter either answers the request itself or hands it to `next`
//! - Misconfiguration fails in constructors, never at request time
//! - Request-time faults come back as `ProxyError` and are rendered as
//!   responses by the pipeline; they never unwind across filters

pub mod identity;
pub mod ports;
pub mod tier;
pub mod token;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;

use crate::config::ProxyConfig;
use crate::http::context::RequestContext;
use crate::observability::{metrics, TrafficReporter};
use crate::proxy::{Dispatcher, ProxyError};

pub use identity::{ClientId, IdentityFilter};
pub use ports::ConnectPortsFilter;
pub use tier::{ProMembership, ProTier, StaticMembership, TierFilter};
pub use token::TokenFilter;

/// What a filter or endpoint produces for a request.
pub type FilterResult = Result<Response, ProxyError>;

/// Construction-time filter errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("token must not be empty")]
    EmptyToken,
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
    #[error("allowed port list must not contain port 0")]
    ZeroPort,
}

/// A unit of request policy.
///
/// Implementations hold only immutable configuration. They may answer the
/// request directly, or adjust the request and context and call
/// `next.run(ctx, req)`.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        req: Request<Body>,
        next: Next<'a>,
    ) -> BoxFuture<'a, FilterResult>;
}

/// The terminal stage that actually serves a request.
pub trait Endpoint: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext, req: Request<Body>)
        -> BoxFuture<'a, FilterResult>;
}

/// The rest of the chain after the current filter.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Box<dyn Filter>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    /// Hand the request to the next filter, or to the endpoint if none remain.
    pub fn run<'b>(self, ctx: &'b mut RequestContext, req: Request<Body>) -> BoxFuture<'b, FilterResult>
    where
        'a: 'b,
    {
        match self.rest.split_first() {
            Some((filter, rest)) => filter.apply(
                ctx,
                req,
                Next {
                    rest,
                    endpoint: self.endpoint,
                },
            ),
            None => self.endpoint.call(ctx, req),
        }
    }
}

/// Ordered filters ending in an endpoint. Immutable and shared by all
/// connection tasks.
pub struct Pipeline {
    filters: Vec<Box<dyn Filter>>,
    endpoint: Box<dyn Endpoint>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            filters: Vec::new(),
        }
    }

    /// The proxy's chain: token, identity, tier, optional port restriction,
    /// then CONNECT/forward dispatch.
    pub fn standard(
        config: &ProxyConfig,
        reporter: Arc<dyn TrafficReporter>,
    ) -> Result<Self, FilterError> {
        let membership = StaticMembership::new(config.tier.pro_users.iter().cloned());
        if !membership.is_empty() {
            tracing::info!(pro_users = membership.len(), "Pro tier enabled");
        }

        let mut builder = Pipeline::builder()
            .filter(TokenFilter::new(&config.auth.token_header, &config.auth.token)?)
            .filter(IdentityFilter::new(&config.auth.uid_header)?)
            .filter(TierFilter::new(Arc::new(membership)));

        if !config.tunnel.allowed_ports.is_empty() {
            builder = builder.filter(ConnectPortsFilter::new(config.tunnel.allowed_ports.clone())?);
        }

        Ok(builder.endpoint(Dispatcher::new(&config.tunnel, &config.forward, reporter)))
    }

    /// Names of the configured filters, in order.
    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Drive one request through the chain. Always yields a response.
    pub async fn run(&self, ctx: &mut RequestContext, req: Request<Body>) -> Response {
        let method = req.method().clone();
        let next = Next {
            rest: &self.filters,
            endpoint: self.endpoint.as_ref(),
        };

        let response = match next.run(ctx, req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    connection_id = %ctx.connection().id(),
                    error = %e,
                    "Request failed"
                );
                e.into_response()
            }
        };

        metrics::record_request(&method, response.status().as_u16());
        response
    }
}

pub struct PipelineBuilder {
    filters: Vec<Box<dyn Filter>>,
}

impl PipelineBuilder {
    /// Append a filter; filters run in the order they are added.
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn endpoint(self, endpoint: impl Endpoint + 'static) -> Pipeline {
        Pipeline {
            filters: self.filters,
            endpoint: Box::new(endpoint),
        }
    }
}

/// The uniform rejection for failed authentication or identity checks.
///
/// Both absence and mismatch yield the same bare 404 so a prober cannot tell
/// that the endpoint wants credentials at all.
pub(crate) fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::http::context::test_context;
    use std::sync::Mutex;

    /// Appends its label to a shared log, then continues.
    struct Trace(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Filter for Trace {
        fn name(&self) -> &'static str {
            self.0
        }

        fn apply<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            req: Request<Body>,
            next: Next<'a>,
        ) -> BoxFuture<'a, FilterResult> {
            Box::pin(async move {
                self.1.lock().unwrap().push(self.0);
                next.run(ctx, req).await
            })
        }
    }

    struct Fail;

    impl Filter for Fail {
        fn name(&self) -> &'static str {
            "fail"
        }

        fn apply<'a>(
            &'a self,
            _ctx: &'a mut RequestContext,
            _req: Request<Body>,
            _next: Next<'a>,
        ) -> BoxFuture<'a, FilterResult> {
            Box::pin(async { Err(ProxyError::Internal("boom".into())) })
        }
    }

    #[tokio::test]
    async fn filters_run_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::new(Recorder::default());
        let pipeline = Pipeline::builder()
            .filter(Trace("a", log.clone()))
            .filter(Trace("b", log.clone()))
            .filter(Trace("c", log.clone()))
            .endpoint(recorder.clone());

        assert_eq!(pipeline.filter_names(), vec!["a", "b", "c"]);

        let mut ctx = test_context();
        let response = pipeline.run(&mut ctx, request("GET", "/", &[])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_become_server_error_responses() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = Pipeline::builder().filter(Fail).endpoint(recorder.clone());

        let mut ctx = test_context();
        let response = pipeline.run(&mut ctx, request("GET", "/", &[])).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn standard_chain_order() {
        let mut config = ProxyConfig::default();
        config.auth.token = "t".into();
        let reporter: Arc<dyn TrafficReporter> = Arc::new(crate::observability::TracingReporter);

        let pipeline = Pipeline::standard(&config, reporter.clone()).unwrap();
        assert_eq!(pipeline.filter_names(), vec!["token", "identity", "tier"]);

        config.tunnel.allowed_ports = vec![443];
        let pipeline = Pipeline::standard(&config, reporter.clone()).unwrap();
        assert_eq!(
            pipeline.filter_names(),
            vec!["token", "identity", "tier", "connect_ports"]
        );

        config.auth.token.clear();
        assert_eq!(
            Pipeline::standard(&config, reporter).err(),
            Some(FilterError::EmptyToken)
        );
    }
}
