//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): responses by method, status
//! - `proxy_connections_active` (gauge): live client connections
//! - `proxy_admission_paused` (gauge): 1 while accept is paused
//! - `proxy_tunnels_total` (counter): finished tunnels by close cause
//! - `proxy_tunnel_bytes_total` (counter): relayed bytes by direction
//! - `proxy_accept_errors_total` (counter): failed accepts

use std::net::SocketAddr;

use axum::http::Method;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &Method, status: u16) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method_label(method),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Label for a request method. Extension methods share `OTHER` so clients
/// cannot grow the label set.
fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        Method::CONNECT => "CONNECT",
        Method::PATCH => "PATCH",
        Method::TRACE => "TRACE",
        _ => "OTHER",
    }
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("proxy_connections_active").set(count as f64);
}

pub fn set_admission_paused(paused: bool) {
    metrics::gauge!("proxy_admission_paused").set(if paused { 1.0 } else { 0.0 });
}

pub fn record_tunnel(close: &'static str, client_to_target: u64, target_to_client: u64) {
    metrics::counter!("proxy_tunnels_total", "close" => close).increment(1);
    metrics::counter!("proxy_tunnel_bytes_total", "direction" => "upstream")
        .increment(client_to_target);
    metrics::counter!("proxy_tunnel_bytes_total", "direction" => "downstream")
        .increment(target_to_client);
}

pub fn record_accept_error() {
    metrics::counter!("proxy_accept_errors_total").increment(1);
}
