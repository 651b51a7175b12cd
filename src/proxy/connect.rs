//! CONNECT tunnel establishment.
//!
//! # Responsibilities
//! - Answer 200 and take over the client connection once hyper releases it
//! - Dial the target with a bounded connect timeout
//! - Run the relay and report what crossed it
//!
//! The 200 goes out before the dial is attempted. If the dial fails the
//! client connection is simply closed; there is no second status to send.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::config::TunnelConfig;
use crate::filters::ClientId;
use crate::http::context::RequestContext;
use crate::observability::{metrics, TrafficReporter};
use crate::proxy::{empty_response, request_authority, ProxyError};
use crate::tunnel::TunnelSession;

pub struct ConnectHandler {
    idle_timeout: Duration,
    connect_timeout: Duration,
    reporter: Arc<dyn TrafficReporter>,
}

impl ConnectHandler {
    pub fn new(config: &TunnelConfig, reporter: Arc<dyn TrafficReporter>) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            connect_timeout: config.connect_timeout(),
            reporter,
        }
    }

    /// Accept the tunnel and spawn its relay task.
    ///
    /// Only a request with no usable `host:port` is refused (400); anything
    /// else gets 200 and the rest happens on the spawned task.
    pub fn handle(&self, ctx: &RequestContext, req: Request<Body>) -> Result<Response, ProxyError> {
        let authority = request_authority(&req).ok_or(ProxyError::MissingTarget)?;
        let port = authority.port_u16().ok_or(ProxyError::MissingTarget)?;
        let target = format!("{}:{}", authority.host(), port);

        let request_id = ctx.request_id();
        let client_id = ctx.get::<ClientId>().cloned();
        // Keeps the connection counted until the tunnel is gone.
        let connection = ctx.connection().clone();
        let idle_timeout = self.idle_timeout;
        let connect_timeout = self.connect_timeout;
        let reporter = self.reporter.clone();

        tokio::spawn(async move {
            let upgraded = match hyper::upgrade::on(req).await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    tracing::debug!(request_id = %request_id, error = %e, "Client connection not released for tunnel");
                    return;
                }
            };

            let outbound = match tokio::time::timeout(connect_timeout, TcpStream::connect(&target)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::debug!(request_id = %request_id, target = %target, error = %e, "Tunnel dial failed, closing client");
                    return;
                }
                Err(_) => {
                    tracing::debug!(request_id = %request_id, target = %target, timeout = ?connect_timeout, "Tunnel dial timed out, closing client");
                    return;
                }
            };
            let _ = outbound.set_nodelay(true);

            tracing::debug!(
                request_id = %request_id,
                connection_id = %connection.id(),
                target = %target,
                "Tunnel established"
            );

            let stats = TunnelSession::new(TokioIo::new(upgraded), outbound, idle_timeout)
                .relay()
                .await;

            metrics::record_tunnel(stats.cause.as_str(), stats.client_to_target, stats.target_to_client);
            if let Some(client_id) = &client_id {
                reporter.report(client_id.as_str(), stats.client_to_target, stats.target_to_client);
            }

            tracing::info!(
                request_id = %request_id,
                connection_id = %connection.id(),
                target = %target,
                close = stats.cause.as_str(),
                bytes_in = stats.client_to_target,
                bytes_out = stats.target_to_client,
                "Tunnel closed"
            );
            drop(connection);
        });

        Ok(empty_response(StatusCode::OK))
    }
}
