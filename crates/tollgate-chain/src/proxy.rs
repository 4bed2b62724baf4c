//! Breaker-guarded forwarding shared by the proxy plugins.
//!
//! Every proxy plugin ends the same way: the call runs through the
//! command key's circuit breaker with the rule's timeout, the outcome is
//! classified into [`ResultType`], and any fallback writes an envelope
//! while letting the chain continue.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tollgate_model::result::messages;
use tollgate_resilience::{
    run_command, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CommandError,
};
use tollgate_telemetry::log_upstream_error;
use tollgate_upstream::{DiscoveryError, HttpClientError, RpcError, UpstreamResponse};

use crate::attributes::{HandledBy, ResultType, RewriteUri};
use crate::error::PluginError;
use crate::exchange::{Exchange, Response};

/// Default per-call timeout when a rule does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Failure of an outbound call.
pub trait UpstreamFailure: Display {
    fn is_timeout(&self) -> bool;
}

impl UpstreamFailure for HttpClientError {
    fn is_timeout(&self) -> bool {
        HttpClientError::is_timeout(self)
    }
}

impl UpstreamFailure for RpcError {
    fn is_timeout(&self) -> bool {
        RpcError::is_timeout(self)
    }
}

impl UpstreamFailure for DiscoveryError {
    fn is_timeout(&self) -> bool {
        false
    }
}

/// Per-rule overrides of the breaker defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerHandle {
    pub failure_threshold: Option<u32>,
    pub failure_window_ms: Option<u64>,
    pub reset_timeout_ms: Option<u64>,
    pub success_threshold: Option<u32>,
}

impl BreakerHandle {
    pub fn apply(&self, defaults: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            failure_window: self
                .failure_window_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.failure_window),
            reset_timeout: self
                .reset_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reset_timeout),
            success_threshold: self.success_threshold.unwrap_or(defaults.success_threshold),
        }
    }
}

/// Breaker key for a group and command, `group:command`.
pub fn command_key(group: &str, command: &str) -> String {
    format!("{group}:{command}")
}

/// `base` joined with `target`, with `http://` assumed when no scheme is
/// given.
pub fn target_url(base: &str, target: &str) -> String {
    let base = base.trim_end_matches('/');
    let target = target.trim_start_matches('/');
    if base.contains("://") {
        format!("{base}/{target}")
    } else {
        format!("http://{base}/{target}")
    }
}

/// The rewrite target if one was set, otherwise `fallback`.
pub fn target_path(exchange: &Exchange, fallback: &str) -> String {
    match exchange.get::<RewriteUri>() {
        Some(RewriteUri(uri)) => uri.clone(),
        None => fallback.to_string(),
    }
}

/// Look up the breaker for a command, applying any rule overrides.
pub fn breaker_for(
    registry: &BreakerRegistry,
    key: &str,
    overrides: Option<&BreakerHandle>,
) -> Arc<CircuitBreaker> {
    match overrides {
        Some(handle) => {
            let config = handle.apply(registry.defaults());
            registry.get(key, Some(&config))
        }
        None => registry.get(key, None),
    }
}

/// Run `call` under `breaker` and record the result on the exchange.
///
/// On success the upstream response is stored as an attribute for the
/// response plugin. Fallbacks write 504 for timeouts and 500 otherwise.
/// The caller continues the chain in every case.
pub async fn forward<F, E>(
    exchange: &mut Exchange,
    plugin: &'static str,
    key: &str,
    breaker: &CircuitBreaker,
    timeout: Duration,
    call: F,
) -> Result<ResultType, PluginError>
where
    F: Future<Output = Result<UpstreamResponse, E>>,
    E: UpstreamFailure,
{
    let result = run_command(breaker, timeout, call).await;
    exchange.insert(HandledBy(plugin));

    let result_type = match result {
        Ok(response) => {
            let result_type = if response.is_success() {
                ResultType::Success
            } else {
                ResultType::Error
            };
            exchange.insert(response);
            result_type
        }
        Err(CommandError::ShortCircuited) => {
            log_upstream_error!(
                plugin,
                command_key = %key,
                request_id = %exchange.request_id(),
                "circuit open, call short-circuited"
            );
            exchange.respond(plugin, Response::error(500, messages::UPSTREAM_ERROR))?;
            ResultType::ShortCircuited
        }
        Err(error) => {
            let timed_out = match &error {
                CommandError::Timeout(_) => true,
                CommandError::Failed(e) => e.is_timeout(),
                CommandError::ShortCircuited => false,
            };
            log_upstream_error!(
                plugin,
                command_key = %key,
                request_id = %exchange.request_id(),
                error = %error,
                timeout = timed_out,
                "upstream call failed"
            );
            if timed_out {
                exchange.respond(plugin, Response::error(504, messages::GATEWAY_TIMEOUT))?;
                ResultType::Timeout
            } else {
                exchange.respond(plugin, Response::error(500, messages::UPSTREAM_ERROR))?;
                ResultType::Error
            }
        }
    };

    exchange.insert(result_type);
    Ok(result_type)
}

/// Write a 500 upstream error without attempting a call, for requests a
/// proxy cannot address.
pub fn fail_unroutable(
    exchange: &mut Exchange,
    plugin: &'static str,
    reason: &str,
) -> Result<(), PluginError> {
    log_upstream_error!(
        plugin,
        request_id = %exchange.request_id(),
        reason,
        "request cannot be routed"
    );
    exchange.insert(HandledBy(plugin));
    exchange.insert(ResultType::Error);
    exchange.respond(plugin, Response::error(500, messages::UPSTREAM_ERROR))
}
