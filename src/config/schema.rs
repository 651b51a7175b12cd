//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default header carrying the shared authentication token.
pub const DEFAULT_TOKEN_HEADER: &str = "X-Lantern-Auth-Token";

/// Default header carrying the client identifier.
pub const DEFAULT_UID_HEADER: &str = "X-Lantern-UID";

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS, admission cap).
    pub listener: ListenerConfig,

    /// Token and identity header settings.
    pub auth: AuthConfig,

    /// CONNECT tunnel settings.
    pub tunnel: TunnelConfig,

    /// Direct (non-CONNECT) forwarding settings.
    pub forward: ForwardConfig,

    /// Pro-tier membership.
    pub tier: TierConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration. When present the listener terminates TLS.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrently open client connections. Zero means unbounded.
    pub max_connections: usize,

    /// Seconds a TLS client may take to finish its handshake.
    pub handshake_timeout_secs: u64,

    /// Seconds to wait for open connections and tunnels after shutdown.
    /// Zero stops without waiting.
    pub drain_timeout_secs: u64,
}

impl ListenerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 0,
            handshake_timeout_secs: 10,
            drain_timeout_secs: 30,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: "cert.pem".to_string(),
            key_path: "key.pem".to_string(),
        }
    }
}

/// Authentication header settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret every request must present.
    pub token: String,

    /// Header carrying the token.
    pub token_header: String,

    /// Header carrying the client identifier.
    pub uid_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            uid_header: DEFAULT_UID_HEADER.to_string(),
        }
    }
}

/// CONNECT tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Tear a tunnel down after this many seconds without traffic on a side.
    pub idle_timeout_secs: u64,

    /// Outbound dial timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Ports CONNECT may target. Empty allows any port.
    pub allowed_ports: Vec<u16>,
}

impl TunnelConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 70,
            connect_timeout_secs: 10,
            allowed_ports: Vec::new(),
        }
    }
}

/// Direct forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Upper bound on waiting for the upstream response head, in seconds.
    pub request_timeout_secs: u64,
}

impl ForwardConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
        }
    }
}

/// Pro-tier membership.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TierConfig {
    /// Client identifiers that belong to the pro tier.
    pub pro_users: Vec<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
