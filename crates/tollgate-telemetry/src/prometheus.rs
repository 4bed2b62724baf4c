//! Prometheus text exposition, served at `/__tollgate/metrics`.

use crate::MetricsRegistry;
use prometheus_client::encoding::text::encode;

/// Content-Type header value for Prometheus text format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render the metrics registry to Prometheus text format.
pub fn render_metrics(registry: &MetricsRegistry) -> String {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &registry.registry) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_metrics_empty() {
        let registry = MetricsRegistry::new();
        let output = render_metrics(&registry);

        assert!(output.contains("tollgate_requests_total"));
        assert!(output.contains("tollgate_active_connections"));
    }

    #[test]
    fn test_render_metrics_with_data() {
        let registry = MetricsRegistry::new();
        registry.record_request("POST", "orders", 200, 0.05);
        registry.record_upstream_result("divide", "timeout");
        registry.connection_opened();

        let output = render_metrics(&registry);

        assert!(output.contains("tollgate_requests_total"));
        assert!(output.contains("result=\"timeout\""));
        assert!(output.contains("tollgate_active_connections 1"));
    }
}
