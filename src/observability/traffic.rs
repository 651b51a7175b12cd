//! Per-client traffic accounting.
//!
//! Reporters receive byte counts keyed by client identifier when a session
//! ends. They are shared by every connection task, so implementations must
//! be `Send + Sync` and tolerate concurrent calls.

use dashmap::DashMap;
use std::sync::Arc;

/// Cumulative byte counts for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficTotals {
    /// Bytes received from the client.
    pub bytes_in: u64,
    /// Bytes sent to the client.
    pub bytes_out: u64,
}

/// Sink for per-client traffic.
pub trait TrafficReporter: Send + Sync {
    fn report(&self, client_id: &str, bytes_in: u64, bytes_out: u64);
}

/// Logs every report at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl TrafficReporter for TracingReporter {
    fn report(&self, client_id: &str, bytes_in: u64, bytes_out: u64) {
        tracing::debug!(client_id = %client_id, bytes_in, bytes_out, "Traffic report");
    }
}

/// Keeps running totals per client in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryReporter {
    totals: Arc<DashMap<String, TrafficTotals>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals for one client, if it has ever been reported.
    pub fn totals(&self, client_id: &str) -> Option<TrafficTotals> {
        self.totals.get(client_id).map(|entry| *entry)
    }

    /// Copy of all totals, sorted by client id.
    pub fn snapshot(&self) -> Vec<(String, TrafficTotals)> {
        let mut all: Vec<_> = self
            .totals
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

impl TrafficReporter for MemoryReporter {
    fn report(&self, client_id: &str, bytes_in: u64, bytes_out: u64) {
        if client_id.is_empty() {
            tracing::warn!("Dropping traffic report without client id");
            return;
        }
        let mut entry = self.totals.entry(client_id.to_string()).or_default();
        entry.bytes_in = entry.bytes_in.saturating_add(bytes_in);
        entry.bytes_out = entry.bytes_out.saturating_add(bytes_out);
    }
}
