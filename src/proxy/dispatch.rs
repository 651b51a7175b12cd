//! Method-based dispatch at the end of the filter chain.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
};
use futures_util::future::BoxFuture;

use crate::config::{ForwardConfig, TunnelConfig};
use crate::filters::{Endpoint, FilterResult};
use crate::http::context::RequestContext;
use crate::observability::TrafficReporter;
use crate::proxy::{ConnectHandler, Forwarder};

/// Sends CONNECT to the tunnel handler and everything else to the forwarder.
pub struct Dispatcher {
    connect: ConnectHandler,
    forward: Forwarder,
}

impl Dispatcher {
    pub fn new(
        tunnel: &TunnelConfig,
        forward: &ForwardConfig,
        reporter: Arc<dyn TrafficReporter>,
    ) -> Self {
        Self {
            connect: ConnectHandler::new(tunnel, reporter.clone()),
            forward: Forwarder::new(forward, reporter),
        }
    }
}

impl Endpoint for Dispatcher {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext, req: Request<Body>) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            if req.method() == Method::CONNECT {
                self.connect.handle(ctx, req)
            } else {
                self.forward.handle(ctx, req).await
            }
        })
    }
}
