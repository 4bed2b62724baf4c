//! Rate limiting plugin.
//!
//! Each matching rule owns a token bucket keyed by the rule id. The bucket
//! parameters come from the rule handle; the counters live in whatever
//! [`RateLimiter`] the gateway was built with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tollgate_chain::{Exchange, Matched, Next, PluginError, Response, RulePlugin};
use tollgate_model::result::messages;
use tollgate_model::BuiltinPlugin;
use tollgate_resilience::RateLimiter;
use tollgate_telemetry::{log_plugin_short_circuit, MetricsRegistry};

const TOO_MANY_REQUESTS: u16 = 429;

/// Upper bound on one limiter check.
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterHandle {
    /// Tokens added per second.
    pub replenish_rate: f64,
    pub burst_capacity: f64,
}

pub struct RateLimiterPlugin {
    limiter: Arc<dyn RateLimiter>,
    check_timeout: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl RateLimiterPlugin {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            limiter,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl RulePlugin for RateLimiterPlugin {
    fn name(&self) -> &'static str {
        BuiltinPlugin::RateLimiter.name()
    }

    fn order(&self) -> i32 {
        BuiltinPlugin::RateLimiter.order()
    }

    async fn handle(
        &self,
        exchange: &mut Exchange,
        matched: Matched,
        next: Next<'_>,
    ) -> Result<(), PluginError> {
        let handle: RateLimiterHandle = match matched.rule.data.decode_handle() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(plugin = self.name(), error = %e, "rate limit not enforced");
                return next.run(exchange).await;
            }
        };

        let rule_id = matched.rule_id();
        let check = self
            .limiter
            .allow(rule_id, handle.replenish_rate, handle.burst_capacity);
        let decision = match tokio::time::timeout(self.check_timeout, check).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                tracing::warn!(plugin = self.name(), rule = %rule_id, error = %e, "rate limiter failed, allowing request");
                return next.run(exchange).await;
            }
            Err(_) => {
                tracing::warn!(plugin = self.name(), rule = %rule_id, "rate limiter timed out, allowing request");
                return next.run(exchange).await;
            }
        };

        if decision.allowed {
            return next.run(exchange).await;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limited(rule_id);
        }
        log_plugin_short_circuit!(
            plugin = self.name(),
            rule = %rule_id,
            request_id = %exchange.request_id(),
            "request rate limited"
        );
        exchange.respond(
            self.name(),
            Response::error(TOO_MANY_REQUESTS, messages::TOO_MANY_REQUESTS),
        )
    }
}
