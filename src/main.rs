//! Forward proxy binary.
//!
//! ```text
//!     Client ──▶ listener (admission) ──▶ [TLS] ──▶ HTTP/1.1 ──▶ filters
//!                                                                  │
//!                                     ┌────────────────────────────┤
//!                                     ▼                            ▼
//!                              CONNECT tunnel               direct forward
//!                              (relay, idle timeout)        (one exchange)
//! ```
//!
//! Configuration comes from an optional TOML file, then command-line flags
//! override individual settings, then the result is validated.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use forward_proxy::config::{read_config, validate_config, ProxyConfig, TlsConfig};
use forward_proxy::lifecycle::{shutdown_signal, Shutdown};
use forward_proxy::observability::{logging, metrics};
use forward_proxy::ProxyServer;

#[derive(Parser, Debug, Default)]
#[command(name = "forward-proxy")]
#[command(about = "Authenticating HTTP forward proxy with CONNECT tunnelling", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(long)]
    addr: Option<String>,

    /// Serve over TLS
    #[arg(long)]
    https: bool,

    /// PEM certificate for TLS (generated if missing together with the key)
    #[arg(long)]
    certfile: Option<String>,

    /// PEM private key for TLS
    #[arg(long)]
    keyfile: Option<String>,

    /// Shared authentication token
    #[arg(long)]
    token: Option<String>,

    /// Maximum concurrent connections, 0 for unbounded
    #[arg(long)]
    maxconns: Option<usize>,

    /// Seconds to let open connections finish after a shutdown signal
    #[arg(long)]
    drain_timeout: Option<u64>,

    /// Tunnel idle timeout in seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Tunnel dial timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Ports CONNECT may target, comma separated
    #[arg(long, value_delimiter = ',')]
    allowed_ports: Vec<u16>,

    /// Pro-tier client ids, comma separated
    #[arg(long, value_delimiter = ',')]
    pro_users: Vec<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(addr) = &self.addr {
            config.listener.bind_address = addr.clone();
        }
        if self.https || self.certfile.is_some() || self.keyfile.is_some() {
            let tls = config.listener.tls.get_or_insert_with(TlsConfig::default);
            if let Some(cert) = &self.certfile {
                tls.cert_path = cert.clone();
            }
            if let Some(key) = &self.keyfile {
                tls.key_path = key.clone();
            }
        }
        if let Some(token) = &self.token {
            config.auth.token = token.clone();
        }
        if let Some(max) = self.maxconns {
            config.listener.max_connections = max;
        }
        if let Some(secs) = self.drain_timeout {
            config.listener.drain_timeout_secs = secs;
        }
        if let Some(secs) = self.idle_timeout {
            config.tunnel.idle_timeout_secs = secs;
        }
        if let Some(secs) = self.connect_timeout {
            config.tunnel.connect_timeout_secs = secs;
        }
        if !self.allowed_ports.is_empty() {
            config.tunnel.allowed_ports = self.allowed_ports.clone();
        }
        if !self.pro_users.is_empty() {
            config.tier.pro_users = self.pro_users.clone();
        }
        if let Some(addr) = &self.metrics_addr {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_logging(&config.observability.log_level);
    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            tracing::error!(error = %error, "Invalid configuration");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        max_connections = config.listener.max_connections,
        idle_timeout_secs = config.tunnel.idle_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validated above.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        }
    }

    let server = ProxyServer::new(config)?;
    let shutdown = Arc::new(Shutdown::new());
    let receiver = shutdown.subscribe();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.trigger();
        }
    });

    server.run(receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
