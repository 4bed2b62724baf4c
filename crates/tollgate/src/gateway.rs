//! Request handling: limits, descriptor extraction, the plugin chain and
//! the reserved `/__tollgate/*` endpoints.

use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, Request, StatusCode};
use thiserror::Error;
use tollgate_cache::{ConfigCache, StoreError};
use tollgate_chain::{
    ChainObserver, ChainOutcome, Exchange, Plugin, PluginChain, PluginError,
    Response as GatewayResponse, RuleDriven,
};
use tollgate_model::result::messages;
use tollgate_model::ResultEnvelope;
use tollgate_plugin_divide::DividePlugin;
use tollgate_plugin_dubbo::DubboPlugin;
use tollgate_plugin_monitor::MonitorPlugin;
use tollgate_plugin_rate_limiter::RateLimiterPlugin;
use tollgate_plugin_response::ResponsePlugin;
use tollgate_plugin_rewrite::RewritePlugin;
use tollgate_plugin_spring_cloud::SpringCloudPlugin;
use tollgate_plugin_waf::WafPlugin;
use tollgate_resilience::{BreakerRegistry, RateLimiter, TokenBucketLimiter};
use tollgate_telemetry::prometheus::render_metrics;
use tollgate_telemetry::{MetricsRegistry, PROMETHEUS_CONTENT_TYPE};
use tollgate_upstream::{
    is_hop_by_hop, HttpClient, HttpClientError, HttpRpcBridge, ServiceRegistry, StaticRegistry,
};

use crate::config::GatewayConfig;
use crate::descriptor;
use crate::limits::RequestLimits;

/// Paths under this prefix never reach the chain.
pub const RESERVED_PREFIX: &str = "/__tollgate/";

pub type HttpResponse = hyper::Response<Full<Bytes>>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] HttpClientError),

    #[error("configuration store failed: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Records per-plugin timings and failures.
struct MetricsObserver {
    metrics: Arc<MetricsRegistry>,
}

impl ChainObserver for MetricsObserver {
    fn plugin_finished(&self, plugin: &str, elapsed: Duration, short_circuit: bool) {
        self.metrics
            .record_plugin(plugin, elapsed.as_secs_f64(), short_circuit);
    }

    fn plugin_failed(&self, plugin: &str, _error: &PluginError) {
        self.metrics.record_chain_failure(plugin);
    }
}

/// Shared gateway state.
pub struct Gateway {
    cache: Arc<ConfigCache>,
    chain: PluginChain,
    metrics: Arc<MetricsRegistry>,
    limits: RequestLimits,
    request_timeout: Duration,
    dev_mode: bool,
}

impl Gateway {
    /// Assemble the built-in plugin chain over `cache`.
    pub fn build(
        config: &GatewayConfig,
        cache: Arc<ConfigCache>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, GatewayError> {
        let client = HttpClient::new(config.http_client())?;
        let breakers = Arc::new(BreakerRegistry::new(config.breaker_defaults()));
        let registry: Arc<dyn ServiceRegistry> =
            Arc::new(StaticRegistry::new(config.discovery.services.clone()));
        let limiter: Arc<dyn RateLimiter> = Arc::new(TokenBucketLimiter::new());
        let rate_limiter = RateLimiterPlugin::new(limiter)
            .with_check_timeout(Duration::from_millis(config.rate_limiter.check_timeout_ms))
            .with_metrics(Arc::clone(&metrics));

        let mut plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(RuleDriven::new(WafPlugin::new(), Arc::clone(&cache))),
            Arc::new(RuleDriven::new(rate_limiter, Arc::clone(&cache))),
            Arc::new(RuleDriven::new(RewritePlugin::new(), Arc::clone(&cache))),
            Arc::new(RuleDriven::new(
                DividePlugin::new(client.clone(), Arc::clone(&breakers)),
                Arc::clone(&cache),
            )),
            Arc::new(RuleDriven::new(
                SpringCloudPlugin::new(client.clone(), registry, Arc::clone(&breakers)),
                Arc::clone(&cache),
            )),
            Arc::new(MonitorPlugin::new(Arc::clone(&metrics))),
            Arc::new(ResponsePlugin::new()),
        ];
        match &config.rpc.bridge_endpoint {
            Some(endpoint) => {
                let bridge = Arc::new(HttpRpcBridge::new(client, endpoint.clone()));
                plugins.push(Arc::new(RuleDriven::new(
                    DubboPlugin::new(bridge, breakers),
                    Arc::clone(&cache),
                )));
            }
            None => tracing::info!("no rpc bridge endpoint configured, dubbo plugin disabled"),
        }

        let chain = PluginChain::new(plugins).with_observer(Arc::new(MetricsObserver {
            metrics: Arc::clone(&metrics),
        }));
        tracing::info!(plugins = ?chain.names(), "plugin chain assembled");

        Ok(Self {
            cache,
            chain,
            metrics,
            limits: config.request_limits(),
            request_timeout: config.request_timeout(),
            dev_mode: config.dev,
        })
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    pub fn chain(&self) -> &PluginChain {
        &self.chain
    }

    /// Handle an incoming HTTP request.
    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
        remote: Option<SocketAddr>,
    ) -> Result<HttpResponse, Infallible>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let start = Instant::now();
        let (parts, body) = req.into_parts();

        if let Err(e) = self.limits.validate_uri(&parts.uri.to_string()) {
            return Ok(self.bad_request(e.reason(), &e.to_string()));
        }

        if parts.uri.path().starts_with(RESERVED_PREFIX) {
            return Ok(self.handle_reserved(parts.uri.path(), &parts.method));
        }

        let headers = descriptor::header_map(&parts);
        if let Err(e) = self.limits.validate_headers(&headers) {
            return Ok(self.bad_request(e.reason(), &e.to_string()));
        }
        if let Some(len) = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
        {
            if let Err(e) = self.limits.validate_body_size(len) {
                return Ok(self.bad_request(e.reason(), &e.to_string()));
            }
        }

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Ok(self.bad_request(
                    "unreadable_body",
                    &format!("failed to read request body: {e}"),
                ));
            }
        };
        // Content-length may be missing or wrong.
        if let Err(e) = self.limits.validate_body_size(body.len()) {
            return Ok(self.bad_request(e.reason(), &e.to_string()));
        }

        let extracted = match descriptor::extract(&parts, headers, body, remote) {
            Ok(extracted) => extracted,
            Err(e) => return Ok(self.bad_request(e.reason(), &e.to_string())),
        };

        let module = extracted.descriptor.module.clone();
        let mut exchange = Exchange::new(extracted.descriptor);
        if let Some(params) = extracted.rpc_params {
            exchange.insert(params);
        }

        let deadline = tokio::time::sleep(self.request_timeout);
        let outcome = self.chain.execute_until(&mut exchange, deadline).await;
        let response = match &outcome {
            ChainOutcome::Cancelled => GatewayResponse::error(504, messages::GATEWAY_TIMEOUT),
            _ => exchange
                .take_response()
                .unwrap_or_else(|| GatewayResponse::error(502, messages::NO_UPSTREAM)),
        };

        let elapsed = start.elapsed();
        self.metrics.record_request(
            parts.method.as_str(),
            &module,
            response.status,
            elapsed.as_secs_f64(),
        );
        tollgate_telemetry::log_request_completed!(
            request_id = %exchange.request_id(),
            module = %module,
            method = %exchange.request().method,
            status = response.status,
            outcome = outcome_label(&outcome),
            duration_ms = elapsed.as_millis() as u64,
            "request completed"
        );

        let request_id = exchange.request_id().to_string();
        let mut http = into_http(response);
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            http.headers_mut().insert("x-request-id", value);
        }
        Ok(http)
    }

    fn handle_reserved(&self, path: &str, method: &Method) -> HttpResponse {
        if method != Method::GET {
            let mut response = into_http(GatewayResponse::error(405, "method not allowed"));
            response
                .headers_mut()
                .insert("allow", HeaderValue::from_static("GET"));
            return response;
        }
        match path {
            "/__tollgate/health" => self.health_response(),
            "/__tollgate/metrics" => self.metrics_response(),
            _ => into_http(GatewayResponse::error(404, "not found")),
        }
    }

    fn health_response(&self) -> HttpResponse {
        let stats = self.cache.stats();
        let body = serde_json::json!({
            "status": "healthy",
            "initialized": self.cache.is_initialized(),
            "plugins": stats.plugins,
            "selectors": stats.selectors,
            "rules": stats.rules,
            "chain": self.chain.names(),
        });
        into_http(GatewayResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body.to_string()),
        })
    }

    fn metrics_response(&self) -> HttpResponse {
        into_http(GatewayResponse {
            status: 200,
            headers: vec![(
                "content-type".to_string(),
                PROMETHEUS_CONTENT_TYPE.to_string(),
            )],
            body: Bytes::from(render_metrics(&self.metrics)),
        })
    }

    /// 400 envelope for a request rejected before the chain. In dev mode
    /// the envelope's `data` carries the reason.
    fn bad_request(&self, reason: &'static str, detail: &str) -> HttpResponse {
        tollgate_telemetry::log_validation_failure!(
            reason = reason,
            detail = %detail,
            "request rejected before dispatch"
        );
        self.metrics.record_validation_failure(reason);

        let mut envelope = ResultEnvelope::error(400, messages::BAD_REQUEST);
        if self.dev_mode {
            envelope.data = serde_json::json!({ "reason": reason, "detail": detail });
        }
        into_http(GatewayResponse::envelope(400, &envelope))
    }
}

fn outcome_label(outcome: &ChainOutcome) -> &'static str {
    match outcome {
        ChainOutcome::Completed => "completed",
        ChainOutcome::ShortCircuited { .. } => "short_circuited",
        ChainOutcome::Failed { .. } => "failed",
        ChainOutcome::Cancelled => "cancelled",
    }
}

/// Convert a chain response for hyper. Hop-by-hop and length headers are
/// dropped; hyper frames the body itself.
pub fn into_http(response: GatewayResponse) -> HttpResponse {
    let mut http = hyper::Response::new(Full::new(response.body));
    *http.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = http.headers_mut();
    for (name, value) in response.headers {
        if is_hop_by_hop(&name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    http
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_cache::ConfigSnapshot;

    const WAF_SNAPSHOT: &str = r#"
plugins:
  - id: "1"
    name: waf
    role: before
selectors:
  - id: s1
    pluginId: "1"
    type: custom_flow
    conditions:
      - paramType: post
        operator: "="
        paramName: module
        paramValue: pdm
rules:
  - id: r1
    selectorId: s1
    conditions:
      - paramType: post
        operator: "="
        paramName: module
        paramValue: pdm
    handle:
      permission: reject
      statusCode: "403"
"#;

    fn gateway(snapshot: &str, config: GatewayConfig) -> Gateway {
        let cache = Arc::new(ConfigCache::new());
        ConfigSnapshot::from_yaml(snapshot).unwrap().apply_to(&cache);
        Gateway::build(&config, cache, Arc::new(MetricsRegistry::new())).unwrap()
    }

    fn request(module: &str) -> Request<Full<Bytes>> {
        Request::post("/gateway")
            .header("module", module)
            .header("method", "list")
            .header("rpcType", "http")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_json(response: HttpResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn waf_rule_rejects_matching_module() {
        let gw = gateway(WAF_SNAPSHOT, GatewayConfig::default());
        let response = gw.handle_request(request("pdm"), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().contains_key("x-request-id"));
        let body = body_json(response).await;
        assert_eq!(body["code"], 403);
        assert_eq!(body["message"], "rejected");
    }

    #[tokio::test]
    async fn unhandled_request_is_502() {
        let gw = gateway(WAF_SNAPSHOT, GatewayConfig::default());
        let response = gw.handle_request(request("orders"), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["code"], 502);
    }

    #[tokio::test]
    async fn invalid_descriptor_is_400() {
        let gw = gateway("{}", GatewayConfig::default());
        let req = Request::post("/gateway")
            .header("method", "list")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = gw.handle_request(req, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], messages::BAD_REQUEST);
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn dev_mode_explains_rejection() {
        let config = GatewayConfig {
            dev: true,
            ..GatewayConfig::default()
        };
        let gw = gateway("{}", config);
        let req = Request::post("/gateway")
            .header("method", "list")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let body = body_json(gw.handle_request(req, None).await.unwrap()).await;
        assert_eq!(body["data"]["reason"], "missing_module");
    }

    #[tokio::test]
    async fn oversized_body_is_400() {
        let mut config = GatewayConfig::default();
        config.limits.max_body_size = 4;
        let gw = gateway("{}", config);
        let req = Request::post("/gateway")
            .header("module", "orders")
            .body(Full::new(Bytes::from_static(b"far too long")))
            .unwrap();
        let response = gw.handle_request(req, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_cache_state() {
        let gw = gateway(WAF_SNAPSHOT, GatewayConfig::default());
        let req = Request::get("/__tollgate/health")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let body = body_json(gw.handle_request(req, None).await.unwrap()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["initialized"], true);
        assert_eq!(body["plugins"], 1);
        assert_eq!(body["chain"][0], "waf");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_requests() {
        let gw = gateway(WAF_SNAPSHOT, GatewayConfig::default());
        gw.handle_request(request("pdm"), None).await.unwrap();

        let req = Request::get("/__tollgate/metrics")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = gw.handle_request(req, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("tollgate_requests_total"));
        assert!(text.contains(r#"module="pdm""#));
    }

    #[tokio::test]
    async fn reserved_paths_only_accept_get() {
        let gw = gateway("{}", GatewayConfig::default());
        let req = Request::post("/__tollgate/health")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = gw.handle_request(req, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET");
    }

    #[test]
    fn chain_runs_builtins_in_order() {
        let config = GatewayConfig {
            rpc: crate::config::RpcSettings {
                bridge_endpoint: Some("http://127.0.0.1:20880/invoke".to_string()),
            },
            ..GatewayConfig::default()
        };
        let gw = gateway("{}", config);
        assert_eq!(
            gw.chain().names(),
            vec![
                "waf",
                "rate_limiter",
                "rewrite",
                "divide",
                "dubbo",
                "springCloud",
                "monitor",
                "response"
            ]
        );
    }
}
