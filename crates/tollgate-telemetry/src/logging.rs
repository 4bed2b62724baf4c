//! Structured logging: JSON to stdout in production, pretty output for
//! development.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// Gateway is starting up.
    pub const STARTUP: &str = "startup";

    /// Gateway is shutting down.
    pub const SHUTDOWN: &str = "shutdown";

    /// Gateway is listening on a port.
    pub const LISTENING: &str = "listening";

    /// A config snapshot was published to the store.
    pub const SNAPSHOT_PUBLISHED: &str = "snapshot_published";

    /// A config node was applied to the cache.
    pub const CONFIG_APPLIED: &str = "config_applied";

    /// A config node was rejected and the previous value kept.
    pub const CONFIG_REJECTED: &str = "config_rejected";

    /// A selector or rule with logging enabled matched a request.
    pub const RULE_MATCHED: &str = "rule_matched";

    /// A plugin short-circuited the chain.
    pub const PLUGIN_SHORT_CIRCUIT: &str = "plugin_short_circuit";

    /// An outbound call failed or timed out.
    pub const UPSTREAM_ERROR: &str = "upstream_error";

    /// A plugin failed unexpectedly.
    pub const CHAIN_FAILURE: &str = "chain_failure";

    /// Request descriptor validation failed.
    pub const VALIDATION_FAILURE: &str = "validation_failure";

    /// Request has been completed.
    pub const REQUEST_COMPLETED: &str = "request_completed";
}

/// Helper macros for structured logging with standard fields.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_shutdown {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::SHUTDOWN,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_snapshot_published {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::SNAPSHOT_PUBLISHED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_config_applied {
    ($($field:tt)*) => {
        tracing::debug!(
            event = $crate::logging::events::CONFIG_APPLIED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_config_rejected {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::CONFIG_REJECTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_rule_matched {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::RULE_MATCHED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_plugin_short_circuit {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::PLUGIN_SHORT_CIRCUIT,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_upstream_error {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::UPSTREAM_ERROR,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_chain_failure {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::CHAIN_FAILURE,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_validation_failure {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::VALIDATION_FAILURE,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_request_completed {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::REQUEST_COMPLETED,
            $($field)*
        )
    };
}
