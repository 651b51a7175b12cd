//! Proxy server: accept loop and per-connection HTTP serving.
//!
//! # Responsibilities
//! - Accept connections through the admission-gated listener
//! - Optionally terminate TLS on each connection's own task
//! - Serve HTTP/1.1 with upgrades enabled so CONNECT can take the socket
//! - Run every request through the shared filter pipeline
//! - Stop accepting when the shutdown signal fires, then drain
//!
//! # Shutdown
//! The listener is closed first. Idle keep-alive connections are told to
//! close, requests in flight finish, and tunnels keep relaying. `serve`
//! returns once every admission permit is released or the drain timeout
//! passes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request};
use hyper::{body::Incoming, server::conn::http1};
use hyper_util::{
    rt::{TokioIo, TokioTimer},
    service::TowerToHyperService,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{validate_config, ProxyConfig, ValidationError};
use crate::filters::{FilterError, Pipeline};
use crate::http::context::RequestContext;
use crate::net::{
    tls, AdmissionBudget, AdmissionListener, AdmissionPermit, ConnectionInfo, ListenerError,
};
use crate::observability::{metrics, TracingReporter, TrafficReporter};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors raised while building or starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0:?}")]
    Config(Vec<ValidationError>),
    #[error("filter setup failed: {0}")]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Tls(#[from] tls::TlsError),
}

/// The forward proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    pipeline: Arc<Pipeline>,
}

impl ProxyServer {
    /// Build a server that logs traffic reports.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    /// Build a server that sends traffic reports to `reporter`.
    pub fn with_reporter(
        config: ProxyConfig,
        reporter: Arc<dyn TrafficReporter>,
    ) -> Result<Self, ServerError> {
        validate_config(&config).map_err(ServerError::Config)?;
        let pipeline = Arc::new(Pipeline::standard(&config, reporter)?);
        tracing::debug!(filters = ?pipeline.filter_names(), "Pipeline ready");
        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind the configured address with the configured connection cap.
    pub async fn bind(&self) -> Result<AdmissionListener, ServerError> {
        let listener = &self.config.listener;
        Ok(AdmissionListener::bind(&listener.bind_address, listener.max_connections).await?)
    }

    /// TLS acceptor for the configured certificate, creating a self-signed
    /// pair first if neither file exists. `None` for a plaintext listener.
    pub async fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ServerError> {
        let Some(tls_config) = &self.config.listener.tls else {
            return Ok(None);
        };
        let host = self
            .config
            .listener
            .bind_address
            .parse::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        let cert_path = Path::new(&tls_config.cert_path);
        let key_path = Path::new(&tls_config.key_path);

        tls::ensure_certificate(cert_path, key_path, &host)?;
        Ok(Some(tls::load_tls_acceptor(cert_path, key_path).await?))
    }

    /// Bind and serve according to the configuration until shutdown.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        match self.tls_acceptor().await? {
            Some(acceptor) => self.serve_https(listener, acceptor, shutdown).await,
            None => self.serve_http(listener, shutdown).await,
        }
    }

    /// Serve plaintext HTTP on `listener`.
    pub async fn serve_http(
        self,
        listener: AdmissionListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        self.serve(listener, None, shutdown).await
    }

    /// Serve HTTP over TLS on `listener`.
    pub async fn serve_https(
        self,
        listener: AdmissionListener,
        acceptor: TlsAcceptor,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        self.serve(listener, Some(acceptor), shutdown).await
    }

    async fn serve(
        self,
        listener: AdmissionListener,
        tls: Option<TlsAcceptor>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            tls = tls.is_some(),
            max_connections = self.config.listener.max_connections,
            "Proxy server starting"
        );

        let handshake_timeout = self.config.listener.handshake_timeout();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        let connection = Connection {
                            pipeline: self.pipeline.clone(),
                            tls: tls.clone(),
                            handshake_timeout,
                            shutdown: shutdown.resubscribe(),
                        };
                        tokio::spawn(connection.handle(stream, peer_addr, permit));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        metrics::record_accept_error();
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        let budget = listener.budget();
        drop(listener);
        drain(&budget, self.config.listener.drain_timeout()).await;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Wait for every live connection to release its permit, up to `timeout`.
async fn drain(budget: &AdmissionBudget, timeout: Duration) {
    let live = budget.live_count();
    if live == 0 {
        return;
    }
    tracing::info!(live_connections = live, timeout_secs = timeout.as_secs(), "Draining connections");

    match tokio::time::timeout(timeout, budget.wait_drained()).await {
        Ok(()) => tracing::info!("All connections closed"),
        Err(_) => tracing::warn!(
            live_connections = budget.live_count(),
            "Drain timeout elapsed, abandoning open connections"
        ),
    }
}

/// What a connection task needs from the server.
struct Connection {
    pipeline: Arc<Pipeline>,
    tls: Option<TlsAcceptor>,
    handshake_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl Connection {
    async fn handle(self, stream: TcpStream, peer_addr: SocketAddr, permit: AdmissionPermit) {
        let _ = stream.set_nodelay(true);

        let Some(acceptor) = self.tls.clone() else {
            let info = ConnectionInfo::new(peer_addr, false, permit);
            return self.serve(stream, info).await;
        };

        match tokio::time::timeout(self.handshake_timeout, acceptor.accept(stream)).await {
            Ok(Ok(stream)) => {
                let info = ConnectionInfo::new(peer_addr, true, permit);
                self.serve(stream, info).await
            }
            Ok(Err(e)) => {
                tracing::debug!(peer_addr = %peer_addr, error = %e, "TLS handshake failed");
            }
            Err(_) => {
                tracing::debug!(
                    peer_addr = %peer_addr,
                    timeout_secs = self.handshake_timeout.as_secs(),
                    "TLS handshake timed out"
                );
            }
        }
    }

    async fn serve<S>(self, stream: S, connection: ConnectionInfo)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let Connection {
            pipeline,
            mut shutdown,
            ..
        } = self;
        let connection_id = connection.id();
        let peer_addr = connection.peer_addr();
        tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, tls = connection.is_tls(), "Serving connection");

        let service = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .service_fn(move |req: Request<Incoming>| {
                let pipeline = pipeline.clone();
                let connection = connection.clone();
                async move {
                    let mut ctx = RequestContext::new(connection);
                    let response = pipeline.run(&mut ctx, req.map(Body::new)).await;
                    Ok::<_, Infallible>(response)
                }
            });

        let conn = http1::Builder::new()
            .timer(TokioTimer::new())
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
            .with_upgrades();
        tokio::pin!(conn);

        // A hijacked CONNECT leaves this future early; its tunnel runs on.
        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };

        if let Err(e) = result {
            tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, error = %e, "Connection ended with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_config_without_token() {
        let err = ProxyServer::new(ProxyConfig::default()).err().unwrap();
        assert!(matches!(err, ServerError::Config(errors) if errors.contains(&ValidationError::EmptyToken)));
    }

    #[tokio::test]
    async fn plaintext_config_has_no_acceptor() {
        let mut config = ProxyConfig::default();
        config.auth.token = "t".into();
        let server = ProxyServer::new(config).unwrap();
        assert!(server.tls_acceptor().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drain_waits_for_permits_up_to_timeout() {
        let budget = Arc::new(AdmissionBudget::new(0));
        let permit = AdmissionPermit::new(budget.clone());

        let started = std::time::Instant::now();
        drain(&budget, Duration::from_millis(100)).await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(budget.live_count(), 1);

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(permit);
        });
        tokio::time::timeout(Duration::from_secs(1), drain(&budget, Duration::from_secs(30)))
            .await
            .expect("drain should end when the last permit is released");
        release.await.unwrap();
    }
}
