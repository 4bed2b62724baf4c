//! Divide plugin: proxies HTTP requests to a load-balanced upstream list.
//!
//! The rule handle carries the candidate upstreams and the balancing
//! strategy. The target path is the rewrite target when one was set,
//! otherwise the request's method name. The call runs through the
//! command's circuit breaker; whatever happens, the chain continues so
//! the monitor and response plugins see the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tollgate_chain::proxy::{self, BreakerHandle, DEFAULT_TIMEOUT_MS};
use tollgate_chain::{Exchange, Matched, Next, PluginError, RulePlugin};
use tollgate_model::{BuiltinPlugin, RequestDescriptor, RpcType};
use tollgate_resilience::BreakerRegistry;
use tollgate_upstream::{
    is_hop_by_hop, HttpClient, LoadBalance, LoadBalancer, Upstream, UpstreamRequest,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivideHandle {
    #[serde(default)]
    pub load_balance: LoadBalance,
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
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

impl DivideHandle {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.filter(|t| *t > 0).unwrap_or(DEFAULT_TIMEOUT_MS))
    }
}

pub struct DividePlugin {
    client: HttpClient,
    balancer: LoadBalancer,
    breakers: Arc<BreakerRegistry>,
}

impl DividePlugin {
    pub fn new(client: HttpClient, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            client,
            balancer: LoadBalancer::new(),
            breakers,
        }
    }
}

fn outbound(request: &RequestDescriptor, url: String, timeout: Duration) -> UpstreamRequest {
    let method = request.http_method.as_deref().unwrap_or("GET");
    let mut outbound = UpstreamRequest::new(method, url).with_timeout(timeout);
    for (name, value) in &request.headers {
        if name == "host" || name == "content-length" || is_hop_by_hop(name) {
            continue;
        }
        outbound = outbound.with_header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
        outbound = outbound.with_body(request.body.clone());
    }
    outbound
}

#[async_trait]
impl RulePlugin for DividePlugin {
    fn name(&self) -> &'static str {
        BuiltinPlugin::Divide.name()
    }

    fn order(&self) -> i32 {
        BuiltinPlugin::Divide.order()
    }

    fn skip(&self, exchange: &Exchange) -> bool {
        exchange.request().rpc_type != RpcType::Http
    }

    async fn handle(
        &self,
        exchange: &mut Exchange,
        matched: Matched,
        next: Next<'_>,
    ) -> Result<(), PluginError> {
        let handle = match matched.rule.data.decode_handle::<DivideHandle>() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    plugin = self.name(),
                    rule = %matched.rule_id(),
                    error = %e,
                    "divide handle is invalid"
                );
                proxy::fail_unroutable(exchange, self.name(), "invalid divide handle")?;
                return next.run(exchange).await;
            }
        };

        let Some(upstream) = self.balancer.select(
            handle.load_balance,
            matched.rule_id(),
            &handle.upstreams,
            exchange.client_ip(),
        ) else {
            proxy::fail_unroutable(exchange, self.name(), "no upstream configured")?;
            return next.run(exchange).await;
        };

        let request = exchange.request();
        let target = proxy::target_path(exchange, &request.method);
        let mut url = proxy::target_url(&upstream.upstream_url, &target);
        if let Some(query) = request.query_string.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let group = handle.group_key.as_deref().unwrap_or(&request.module);
        let command = handle.command_key.as_deref().unwrap_or(&request.method);
        let key = proxy::command_key(group, command);
        let breaker = proxy::breaker_for(&self.breakers, &key, handle.breaker.as_ref());
        let timeout = handle.timeout();
        let upstream_request = outbound(request, url, timeout);

        let call = self.client.call(upstream_request);
        proxy::forward(exchange, self.name(), &key, &breaker, timeout, call).await?;
        next.run(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_cache::{ConfigCache, ConfigSnapshot};
    use tollgate_chain::{PluginChain, ResultType, RewriteUri, RuleDriven, UpstreamResponse};
    use tollgate_upstream::HttpClientConfig;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chain(handle: &str, breakers: Arc<BreakerRegistry>) -> PluginChain {
        let yaml = format!(
            r#"
plugins:
  - id: "5"
    name: divide
selectors:
  - id: s1
    pluginId: "5"
    type: full_flow
rules:
  - id: r1
    selectorId: s1
    handle: {handle}
"#
        );
        let cache = Arc::new(ConfigCache::new());
        ConfigSnapshot::from_yaml(&yaml).unwrap().apply_to(&cache);
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        PluginChain::new(vec![Arc::new(RuleDriven::new(
            DividePlugin::new(client, breakers),
            cache,
        ))])
    }

    fn request() -> RequestDescriptor {
        RequestDescriptor::new("orders", "list", RpcType::Http).with_http_method("GET")
    }

    #[test]
    fn handle_defaults() {
        let handle: DivideHandle = serde_json::from_str("{}").unwrap();
        assert_eq!(handle.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(handle.load_balance, LoadBalance::Random);
        assert!(handle.upstreams.is_empty());
    }

    #[tokio::test]
    async fn forwards_to_method_path_with_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(query_param("page", "2"))
            .and(header("x-tenant", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let handle = format!("{{upstreams: [{{upstreamUrl: '{}'}}]}}", server.uri());
        let chain = chain(&handle, Arc::new(BreakerRegistry::default()));
        let mut req = request().with_header("X-Tenant", "acme").with_header("Host", "gw");
        req.query_string = Some("page=2".into());
        let mut ex = Exchange::new(req);

        assert!(chain.execute(&mut ex).await.is_completed());
        let upstream = ex.get::<UpstreamResponse>().unwrap();
        assert_eq!(upstream.status, 200);
        assert_eq!(&upstream.body[..], b"ok");
        assert_eq!(ex.get::<ResultType>(), Some(&ResultType::Success));
    }

    #[tokio::test]
    async fn rewrite_target_replaces_method() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/orders"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let handle = format!("{{upstreams: [{{upstreamUrl: '{}'}}]}}", server.uri());
        let chain = chain(&handle, Arc::new(BreakerRegistry::default()));
        let mut ex = Exchange::new(request());
        ex.insert(RewriteUri("/v2/orders".into()));

        chain.execute(&mut ex).await;
        assert_eq!(ex.get::<UpstreamResponse>().unwrap().status, 200);
    }

    #[tokio::test]
    async fn slow_upstream_times_out_with_504() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let handle = format!(
            "{{timeout: 50, upstreams: [{{upstreamUrl: '{}'}}]}}",
            server.uri()
        );
        let chain = chain(&handle, Arc::new(BreakerRegistry::default()));
        let mut ex = Exchange::new(request());

        assert!(chain.execute(&mut ex).await.is_completed());
        assert_eq!(ex.response().unwrap().status, 504);
        assert_eq!(ex.get::<ResultType>(), Some(&ResultType::Timeout));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let handle = "{upstreams: [{upstreamUrl: 'http://127.0.0.1:1'}], breaker: {failureThreshold: 1}}";
        let breakers = Arc::new(BreakerRegistry::default());
        let chain = chain(handle, Arc::clone(&breakers));

        let mut first = Exchange::new(request());
        chain.execute(&mut first).await;
        assert_eq!(first.response().unwrap().status, 500);

        let mut second = Exchange::new(request());
        chain.execute(&mut second).await;
        assert_eq!(second.response().unwrap().status, 500);
        assert_eq!(second.get::<ResultType>(), Some(&ResultType::ShortCircuited));
    }

    #[tokio::test]
    async fn empty_upstream_list_is_unroutable() {
        let chain = chain("{upstreams: []}", Arc::new(BreakerRegistry::default()));
        let mut ex = Exchange::new(request());
        assert!(chain.execute(&mut ex).await.is_completed());
        assert_eq!(ex.response().unwrap().status, 500);
        assert_eq!(ex.get::<ResultType>(), Some(&ResultType::Error));
    }

    #[tokio::test]
    async fn non_http_requests_are_skipped() {
        let chain = chain("{upstreams: []}", Arc::new(BreakerRegistry::default()));
        let mut ex = Exchange::new(RequestDescriptor::new("orders", "list", RpcType::Dubbo));
        assert!(chain.execute(&mut ex).await.is_completed());
        assert!(!ex.has_response());
    }
}
