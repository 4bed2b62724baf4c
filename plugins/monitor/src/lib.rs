//! Monitor plugin: counts proxied call outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use tollgate_chain::{Exchange, HandledBy, Next, Plugin, PluginError, ResultType};
use tollgate_model::{BuiltinPlugin, PluginRole};
use tollgate_telemetry::MetricsRegistry;

pub struct MonitorPlugin {
    metrics: Arc<MetricsRegistry>,
}

impl MonitorPlugin {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Plugin for MonitorPlugin {
    fn name(&self) -> &str {
        BuiltinPlugin::Monitor.name()
    }

    fn order(&self) -> i32 {
        BuiltinPlugin::Monitor.order()
    }

    fn role(&self) -> PluginRole {
        PluginRole::After
    }

    async fn execute(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), PluginError> {
        if let Some(result) = exchange.get::<ResultType>() {
            let plugin = exchange.get::<HandledBy>().map_or("unknown", |h| h.0);
            tracing::debug!(
                plugin,
                result = result.as_str(),
                request_id = %exchange.request_id(),
                "upstream call classified"
            );
            self.metrics.record_upstream_result(plugin, result.as_str());
        }
        next.run(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_chain::PluginChain;
    use tollgate_model::{RequestDescriptor, RpcType};
    use tollgate_telemetry::prometheus::render_metrics;

    fn setup() -> (Arc<MetricsRegistry>, PluginChain) {
        let metrics = Arc::new(MetricsRegistry::new());
        let chain = PluginChain::new(vec![Arc::new(MonitorPlugin::new(Arc::clone(&metrics)))]);
        (metrics, chain)
    }

    #[tokio::test]
    async fn records_classified_result() {
        let (metrics, chain) = setup();
        let mut ex = Exchange::new(RequestDescriptor::new("orders", "list", RpcType::Http));
        ex.insert(HandledBy("divide"));
        ex.insert(ResultType::Timeout);

        assert!(chain.execute(&mut ex).await.is_completed());
        let output = render_metrics(&metrics);
        assert!(output.contains("tollgate_upstream_results"));
        assert!(output.contains(r#"plugin="divide""#));
        assert!(output.contains(r#"result="timeout""#));
    }

    #[tokio::test]
    async fn unproxied_requests_record_nothing() {
        let (metrics, chain) = setup();
        let mut ex = Exchange::new(RequestDescriptor::new("orders", "list", RpcType::Http));

        assert!(chain.execute(&mut ex).await.is_completed());
        assert!(!render_metrics(&metrics).contains(r#"result="#));
    }
}
