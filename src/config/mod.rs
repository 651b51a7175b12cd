//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → CLI overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc with the server and pipeline
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, read_config, ConfigError};
pub use schema::{
    AuthConfig, ForwardConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, TierConfig,
    TlsConfig, TunnelConfig,
};
pub use validation::{validate_config, ValidationError};
