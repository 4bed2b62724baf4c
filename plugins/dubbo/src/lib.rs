//! Dubbo plugin: invokes a remote method through an [`RpcInvoker`].
//!
//! The method coordinates come from the request ([`RpcParams`] in the
//! attribute bag); the rule supplies the registry, application name,
//! timeout and breaker settings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tollgate_chain::proxy::{self, BreakerHandle, DEFAULT_TIMEOUT_MS};
use tollgate_chain::{Exchange, Matched, Next, PluginError, RpcParams, RulePlugin};
use tollgate_model::{BuiltinPlugin, RpcType};
use tollgate_resilience::BreakerRegistry;
use tollgate_upstream::{RpcInvoker, RpcRequest, UpstreamResponse};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DubboHandle {
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub command_key: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub breaker: Option<BreakerHandle>,
}

impl DubboHandle {
    fn is_complete(&self) -> bool {
        !self.registry.trim().is_empty() && !self.app_name.trim().is_empty()
    }
}

pub struct DubboPlugin {
    invoker: Arc<dyn RpcInvoker>,
    breakers: Arc<BreakerRegistry>,
}

impl DubboPlugin {
    pub fn new(invoker: Arc<dyn RpcInvoker>, breakers: Arc<BreakerRegistry>) -> Self {
        Self { invoker, breakers }
    }
}

#[async_trait]
impl RulePlugin for DubboPlugin {
    fn name(&self) -> &'static str {
        BuiltinPlugin::Dubbo.name()
    }

    fn order(&self) -> i32 {
        BuiltinPlugin::Dubbo.order()
    }

    fn skip(&self, exchange: &Exchange) -> bool {
        exchange.request().rpc_type != RpcType::Dubbo
    }

    async fn handle(
        &self,
        exchange: &mut Exchange,
        matched: Matched,
        next: Next<'_>,
    ) -> Result<(), PluginError> {
        let handle = match matched.rule.data.decode_handle::<DubboHandle>() {
            Ok(handle) if handle.is_complete() => handle,
            Ok(_) => {
                tracing::warn!(
                    plugin = self.name(),
                    rule = %matched.rule_id(),
                    "dubbo rule needs registry and appName"
                );
                return next.run(exchange).await;
            }
            Err(e) => {
                tracing::warn!(
                    plugin = self.name(),
                    rule = %matched.rule_id(),
                    error = %e,
                    "dubbo rule ignored"
                );
                return next.run(exchange).await;
            }
        };

        let Some(params) = exchange.get::<RpcParams>().cloned() else {
            proxy::fail_unroutable(exchange, self.name(), "request carries no rpc parameters")?;
            return next.run(exchange).await;
        };

        let group = handle.group_key.as_deref().unwrap_or(&params.interface_name);
        let command = handle.command_key.as_deref().unwrap_or(&params.method);
        let key = proxy::command_key(group, command);
        let breaker = proxy::breaker_for(&self.breakers, &key, handle.breaker.as_ref());
        let timeout = Duration::from_millis(
            handle
                .timeout
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        );

        let request = RpcRequest {
            registry: handle.registry,
            app_name: handle.app_name,
            params,
            timeout: Some(timeout),
        };
        let invoker = Arc::clone(&self.invoker);
        let call = async move {
            invoker
                .invoke(request)
                .await
                .map(|value| UpstreamResponse::json(&value))
        };

        proxy::forward(exchange, self.name(), &key, &breaker, timeout, call).await?;
        next.run(exchange).await
    }
}
