//! Observability infrastructure for the Tollgate API gateway.
//!
//! This crate provides:
//! - Structured JSON or pretty logging with standard event names
//! - Prometheus metrics registry and exposition
//!
//! # Usage
//!
//! ```ignore
//! use tollgate_telemetry::{Telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::new().with_log_level("debug");
//! let telemetry = Telemetry::init(config)?;
//! telemetry.metrics().record_request("POST", "orders", 200, 0.01);
//! ```

pub mod config;
pub mod logging;
pub mod metrics;
pub mod prometheus;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::events;
pub use metrics::MetricsRegistry;
pub use prometheus::PROMETHEUS_CONTENT_TYPE;

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

/// Main telemetry handle.
pub struct Telemetry {
    config: TelemetryConfig,
    metrics: Arc<MetricsRegistry>,
}

impl Telemetry {
    /// Install the global log subscriber and create the metrics registry.
    pub fn init(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        logging::init_logging(&config)?;
        Ok(Self::init_without_logging(config))
    }

    /// Create the metrics registry only.
    ///
    /// Use this when logging is already initialized (e.g., in tests).
    pub fn init_without_logging(config: TelemetryConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Render metrics in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        prometheus::render_metrics(&self.metrics)
    }
}
