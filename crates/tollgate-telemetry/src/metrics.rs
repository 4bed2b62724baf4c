//! Prometheus metrics registry.
//!
//! Counter names are registered without the `_total` suffix;
//! prometheus-client appends it on encoding.

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

/// Duration histogram buckets (in seconds), 1ms to 10s.
const DURATION_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub method: String,
    pub module: String,
    pub status: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PluginLabels {
    pub plugin: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamLabels {
    pub plugin: String,
    /// `success`, `error`, `timeout` or `short_circuited`.
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RuleLabels {
    pub rule: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ConfigLabels {
    pub kind: String,
    /// `applied`, `deleted` or `rejected`.
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ValidationLabels {
    pub reason: String,
}

/// Metrics registry holding all Tollgate metrics.
pub struct MetricsRegistry {
    /// The prometheus-client registry for encoding.
    pub registry: Registry,

    // Request metrics
    pub requests_total: Family<RequestLabels, Counter>,
    pub request_duration_seconds: Family<RequestLabels, Histogram>,
    pub validation_failures_total: Family<ValidationLabels, Counter>,

    // Connection metrics
    pub active_connections: Gauge,
    pub connections_total: Counter,

    // Chain metrics
    pub plugin_duration_seconds: Family<PluginLabels, Histogram>,
    pub plugin_short_circuits_total: Family<PluginLabels, Counter>,
    pub chain_failures_total: Family<PluginLabels, Counter>,

    // Resilience metrics
    pub upstream_results_total: Family<UpstreamLabels, Counter>,
    pub rate_limited_total: Family<RuleLabels, Counter>,

    // Config metrics
    pub config_updates_total: Family<ConfigLabels, Counter>,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Request metrics
        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "tollgate_requests",
            "Total number of requests processed",
            requests_total.clone(),
        );

        let request_duration_seconds =
            Family::<RequestLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(DURATION_BUCKETS.iter().cloned())
            });
        registry.register(
            "tollgate_request_duration_seconds",
            "Request duration in seconds",
            request_duration_seconds.clone(),
        );

        let validation_failures_total = Family::<ValidationLabels, Counter>::default();
        registry.register(
            "tollgate_validation_failures",
            "Total number of rejected request descriptors",
            validation_failures_total.clone(),
        );

        // Connection metrics
        let active_connections = Gauge::default();
        registry.register(
            "tollgate_active_connections",
            "Number of currently active connections",
            active_connections.clone(),
        );

        let connections_total = Counter::default();
        registry.register(
            "tollgate_connections",
            "Total number of connections accepted",
            connections_total.clone(),
        );

        // Chain metrics
        let plugin_duration_seconds =
            Family::<PluginLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(DURATION_BUCKETS.iter().cloned())
            });
        registry.register(
            "tollgate_plugin_duration_seconds",
            "Plugin execution duration in seconds, including awaited I/O",
            plugin_duration_seconds.clone(),
        );

        let plugin_short_circuits_total = Family::<PluginLabels, Counter>::default();
        registry.register(
            "tollgate_plugin_short_circuits",
            "Total number of chain short-circuits per plugin",
            plugin_short_circuits_total.clone(),
        );

        let chain_failures_total = Family::<PluginLabels, Counter>::default();
        registry.register(
            "tollgate_chain_failures",
            "Total number of unexpected plugin failures",
            chain_failures_total.clone(),
        );

        // Resilience metrics
        let upstream_results_total = Family::<UpstreamLabels, Counter>::default();
        registry.register(
            "tollgate_upstream_results",
            "Outcome of proxied calls per plugin",
            upstream_results_total.clone(),
        );

        let rate_limited_total = Family::<RuleLabels, Counter>::default();
        registry.register(
            "tollgate_rate_limited",
            "Total number of requests rejected by the rate limiter",
            rate_limited_total.clone(),
        );

        // Config metrics
        let config_updates_total = Family::<ConfigLabels, Counter>::default();
        registry.register(
            "tollgate_config_updates",
            "Configuration changes seen by the cache",
            config_updates_total.clone(),
        );

        Self {
            registry,
            requests_total,
            request_duration_seconds,
            validation_failures_total,
            active_connections,
            connections_total,
            plugin_duration_seconds,
            plugin_short_circuits_total,
            chain_failures_total,
            upstream_results_total,
            rate_limited_total,
            config_updates_total,
        }
    }

    /// Record a completed request.
    pub fn record_request(&self, method: &str, module: &str, status: u16, duration_secs: f64) {
        let labels = RequestLabels {
            method: method.to_string(),
            module: module.to_string(),
            status,
        };
        self.requests_total.get_or_create(&labels).inc();
        self.request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_validation_failure(&self, reason: &str) {
        let labels = ValidationLabels {
            reason: reason.to_string(),
        };
        self.validation_failures_total.get_or_create(&labels).inc();
    }

    /// Record one plugin step.
    pub fn record_plugin(&self, plugin: &str, duration_secs: f64, short_circuit: bool) {
        let labels = PluginLabels {
            plugin: plugin.to_string(),
        };
        self.plugin_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
        if short_circuit {
            self.plugin_short_circuits_total.get_or_create(&labels).inc();
        }
    }

    pub fn record_chain_failure(&self, plugin: &str) {
        let labels = PluginLabels {
            plugin: plugin.to_string(),
        };
        self.chain_failures_total.get_or_create(&labels).inc();
    }

    pub fn record_upstream_result(&self, plugin: &str, result: &str) {
        let labels = UpstreamLabels {
            plugin: plugin.to_string(),
            result: result.to_string(),
        };
        self.upstream_results_total.get_or_create(&labels).inc();
    }

    pub fn record_rate_limited(&self, rule: &str) {
        let labels = RuleLabels {
            rule: rule.to_string(),
        };
        self.rate_limited_total.get_or_create(&labels).inc();
    }

    pub fn record_config_update(&self, kind: &str, outcome: &str) {
        let labels = ConfigLabels {
            kind: kind.to_string(),
            outcome: outcome.to_string(),
        };
        self.config_updates_total.get_or_create(&labels).inc();
    }

    pub fn connection_opened(&self) {
        self.active_connections.inc();
        self.connections_total.inc();
    }

    pub fn connection_closed(&self) {
        self.active_connections.dec();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
