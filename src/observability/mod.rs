//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!     → traffic.rs (per-client byte totals at session end)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → Traffic sink (pluggable TrafficReporter)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never preformatted strings, for ids and addresses
//! - Metric updates are no-ops until an exporter is installed
//! - Traffic reporters must tolerate concurrent calls from many tunnels

pub mod logging;
pub mod metrics;
pub mod traffic;

pub use traffic::{MemoryReporter, TrafficReporter, TrafficTotals, TracingReporter};
