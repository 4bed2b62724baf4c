//! Plugins driven by selector and rule configuration.

use std::sync::Arc;

use async_trait::async_trait;
use tollgate_cache::ConfigCache;
use tollgate_model::PluginRole;
use tollgate_router::{Rule, Selector};
use tollgate_telemetry::log_rule_matched;

use crate::chain::{Next, Plugin};
use crate::error::PluginError;
use crate::exchange::Exchange;

/// The selector and rule that applied to a request.
#[derive(Debug, Clone)]
pub struct Matched {
    pub selector: Arc<Selector>,
    pub rule: Arc<Rule>,
}

impl Matched {
    pub fn rule_id(&self) -> &str {
        self.rule.id()
    }
}

/// A plugin whose behaviour is configured per rule.
///
/// Wrap it in [`RuleDriven`] to register it in a chain. The wrapper only
/// calls [`handle`](Self::handle) once a selector and a rule matched; a
/// disabled or unconfigured plugin, or a request nothing matches, goes to
/// [`on_miss`](Self::on_miss).
#[async_trait]
pub trait RulePlugin: Send + Sync {
    /// Configuration key of the plugin.
    fn name(&self) -> &'static str;

    fn order(&self) -> i32;

    fn role(&self) -> PluginRole {
        PluginRole::Function
    }

    fn skip(&self, _exchange: &Exchange) -> bool {
        false
    }

    async fn handle(
        &self,
        exchange: &mut Exchange,
        matched: Matched,
        next: Next<'_>,
    ) -> Result<(), PluginError>;

    /// Defaults to passing the request through.
    async fn on_miss(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), PluginError> {
        next.run(exchange).await
    }
}

/// Adapter resolving a [`RulePlugin`]'s rule from the live cache.
pub struct RuleDriven<P> {
    inner: P,
    cache: Arc<ConfigCache>,
}

impl<P: RulePlugin> RuleDriven<P> {
    pub fn new(inner: P, cache: Arc<ConfigCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn resolve(&self, exchange: &Exchange) -> Option<Matched> {
        let name = self.inner.name();
        let Some(plugin) = self.cache.plugin(name) else {
            tracing::trace!(plugin = name, "plugin not configured");
            return None;
        };
        if !plugin.enabled {
            return None;
        }

        let request = exchange.request();
        let selector = self.cache.resolve_selector(&plugin.id, request)?;
        if selector.data.logged {
            log_rule_matched!(
                plugin = name,
                selector = %selector.id(),
                request_id = %exchange.request_id(),
                "selector matched"
            );
        }

        let rule = self.cache.resolve_rule(&selector, request)?;
        if rule.data.logged {
            log_rule_matched!(
                plugin = name,
                selector = %selector.id(),
                rule = %rule.id(),
                request_id = %exchange.request_id(),
                "rule matched"
            );
        }
        Some(Matched { selector, rule })
    }
}

#[async_trait]
impl<P: RulePlugin> Plugin for RuleDriven<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn order(&self) -> i32 {
        self.inner.order()
    }

    fn role(&self) -> PluginRole {
        self.inner.role()
    }

    fn skip(&self, exchange: &Exchange) -> bool {
        self.inner.skip(exchange)
    }

    async fn execute(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), PluginError> {
        match self.resolve(exchange) {
            Some(matched) => self.inner.handle(exchange, matched, next).await,
            None => self.inner.on_miss(exchange, next).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainOutcome, PluginChain};
    use crate::exchange::Response;
    use serde_json::json;
    use tollgate_model::{
        ConditionData, MatchMode, Operator, ParamType, PluginData, RequestDescriptor, RpcType,
        RuleData, SelectorData,
    };

    struct Deny;

    #[async_trait]
    impl RulePlugin for Deny {
        fn name(&self) -> &'static str {
            "waf"
        }

        fn order(&self) -> i32 {
            10
        }

        async fn handle(
            &self,
            exchange: &mut Exchange,
            matched: Matched,
            _next: Next<'_>,
        ) -> Result<(), PluginError> {
            let status = matched.rule.data.handle["statusCode"].as_u64().unwrap_or(403) as u16;
            exchange.respond(self.name(), Response::error(status, "rejected"))
        }
    }

    fn cache() -> Arc<ConfigCache> {
        let cache = Arc::new(ConfigCache::new());
        let module_is_pdm = ConditionData::new(ParamType::Post, "module", Operator::Eq, "pdm");
        cache.put_plugin(PluginData::new("1", "waf", PluginRole::Before));
        cache.put_selectors(
            "1",
            vec![SelectorData::new("s1", "1", 1)
                .with_match_mode(MatchMode::And)
                .with_condition(module_is_pdm.clone())],
        );
        cache.put_rules(
            "s1",
            vec![RuleData::new("r1", "s1", 1)
                .with_condition(module_is_pdm)
                .with_handle(json!({"permission": "reject", "statusCode": "403"}))],
        );
        cache.mark_initialized();
        cache
    }

    fn chain(cache: Arc<ConfigCache>) -> PluginChain {
        PluginChain::new(vec![Arc::new(RuleDriven::new(Deny, cache))])
    }

    #[tokio::test]
    async fn matching_rule_is_handled() {
        let chain = chain(cache());
        let mut ex = Exchange::new(
            RequestDescriptor::new("pdm", "list", RpcType::Http).with_post_param("module", "pdm"),
        );
        let outcome = chain.execute(&mut ex).await;
        assert!(matches!(outcome, ChainOutcome::ShortCircuited { .. }));
        assert_eq!(ex.response().unwrap().status, 403);
    }

    #[tokio::test]
    async fn no_match_passes_through() {
        let chain = chain(cache());
        let mut ex = Exchange::new(RequestDescriptor::new("other", "list", RpcType::Http));
        assert!(chain.execute(&mut ex).await.is_completed());
        assert!(!ex.has_response());
    }

    #[tokio::test]
    async fn disabled_plugin_passes_through() {
        let cache = cache();
        cache.put_plugin(PluginData::new("1", "waf", PluginRole::Before).with_enabled(false));
        let chain = chain(cache);
        let mut ex = Exchange::new(
            RequestDescriptor::new("pdm", "list", RpcType::Http).with_post_param("module", "pdm"),
        );
        assert!(chain.execute(&mut ex).await.is_completed());
    }

    #[tokio::test]
    async fn uninitialized_cache_passes_through() {
        let chain = chain(Arc::new(ConfigCache::new()));
        let mut ex = Exchange::new(
            RequestDescriptor::new("pdm", "list", RpcType::Http).with_post_param("module", "pdm"),
        );
        assert!(chain.execute(&mut ex).await.is_completed());
    }
}
