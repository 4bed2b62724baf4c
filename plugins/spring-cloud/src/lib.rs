//! Spring Cloud plugin: proxies to an instance resolved by service id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tollgate_chain::proxy::{self, BreakerHandle, DEFAULT_TIMEOUT_MS};
use tollgate_chain::{Exchange, Matched, Next, PluginError, RulePlugin};
use tollgate_model::{BuiltinPlugin, RequestDescriptor, RpcType};
use tollgate_resilience::BreakerRegistry;
use tollgate_upstream::{
    append_query, HttpClient, HttpClientError, LoadBalance, LoadBalancer, ServiceRegistry,
    UpstreamRequest,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpringCloudHandle {
    #[serde(default)]
    pub service_id: String,
    /// Target path when no rewrite applies.
    #[serde(default)]
    pub path: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub command_key: Option<String>,
    #[serde(default)]
    pub breaker: Option<BreakerHandle>,
}

pub struct SpringCloudPlugin {
    client: HttpClient,
    registry: Arc<dyn ServiceRegistry>,
    balancer: LoadBalancer,
    breakers: Arc<BreakerRegistry>,
}

impl SpringCloudPlugin {
    pub fn new(
        client: HttpClient,
        registry: Arc<dyn ServiceRegistry>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            client,
            registry,
            balancer: LoadBalancer::new(),
            breakers,
        }
    }
}

/// Query pairs from the request's ext-info JSON object. Non-string values
/// are rendered as JSON.
fn ext_info_pairs(ext_info: Option<&str>) -> Vec<(String, String)> {
    let Some(raw) = ext_info.filter(|s| !s.trim().is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        _ => {
            tracing::debug!("ext info is not a JSON object, not forwarded");
            Vec::new()
        }
    }
}

fn outbound(
    request: &RequestDescriptor,
    url: &str,
    timeout: Duration,
) -> Result<UpstreamRequest, HttpClientError> {
    let method = request.http_method.as_deref().unwrap_or("GET");
    if method.eq_ignore_ascii_case("GET") {
        let pairs = ext_info_pairs(request.ext_info.as_deref());
        let url = append_query(url, pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        return Ok(UpstreamRequest::new("GET", url).with_timeout(timeout));
    }

    let mut outbound = UpstreamRequest::new(method, url)
        .with_timeout(timeout)
        .with_body(request.body.clone());
    if let Some(content_type) = request.headers.get("content-type") {
        outbound = outbound.with_header("content-type", content_type.as_str());
    }
    Ok(outbound)
}

#[async_trait]
impl RulePlugin for SpringCloudPlugin {
    fn name(&self) -> &'static str {
        BuiltinPlugin::SpringCloud.name()
    }

    fn order(&self) -> i32 {
        BuiltinPlugin::SpringCloud.order()
    }

    fn skip(&self, exchange: &Exchange) -> bool {
        exchange.request().rpc_type != RpcType::SpringCloud
    }

    async fn handle(
        &self,
        exchange: &mut Exchange,
        matched: Matched,
        next: Next<'_>,
    ) -> Result<(), PluginError> {
        let handle = match matched.rule.data.decode_handle::<SpringCloudHandle>() {
            Ok(handle) if !handle.service_id.trim().is_empty() => handle,
            Ok(_) => {
                tracing::warn!(
                    plugin = self.name(),
                    rule = %matched.rule_id(),
                    "springCloud rule has no serviceId"
                );
                return next.run(exchange).await;
            }
            Err(e) => {
                tracing::warn!(
                    plugin = self.name(),
                    rule = %matched.rule_id(),
                    error = %e,
                    "springCloud rule ignored"
                );
                return next.run(exchange).await;
            }
        };

        let instances = match self.registry.instances(&handle.service_id).await {
            Ok(instances) => instances,
            Err(e) => {
                proxy::fail_unroutable(exchange, self.name(), &e.to_string())?;
                return next.run(exchange).await;
            }
        };
        let Some(instance) = self.balancer.select(
            LoadBalance::Random,
            &handle.service_id,
            &instances,
            exchange.client_ip(),
        ) else {
            proxy::fail_unroutable(exchange, self.name(), "service has no instances")?;
            return next.run(exchange).await;
        };

        let request = exchange.request();
        let fallback = handle.path.as_deref().unwrap_or(&request.method);
        let target = proxy::target_path(exchange, fallback);
        let url = proxy::target_url(&instance.upstream_url, &target);
        let timeout = Duration::from_millis(
            handle
                .timeout
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        );
        let upstream_request = match outbound(request, &url, timeout) {
            Ok(upstream_request) => upstream_request,
            Err(e) => {
                proxy::fail_unroutable(exchange, self.name(), &e.to_string())?;
                return next.run(exchange).await;
            }
        };

        let group = handle.group_key.as_deref().unwrap_or(&request.module);
        let command = handle.command_key.as_deref().unwrap_or(&request.method);
        let key = proxy::command_key(group, command);
        let breaker = proxy::breaker_for(&self.breakers, &key, handle.breaker.as_ref());

        let call = self.client.call(upstream_request);
        proxy::forward(exchange, self.name(), &key, &breaker, timeout, call).await?;
        next.run(exchange).await
    }
}
