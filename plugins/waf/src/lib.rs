//! Web application firewall plugin.
//!
//! A matching rule either allows the request or rejects it with HTTP 403.
//! The envelope code comes from the rule's `statusCode`.

use async_trait::async_trait;
use serde::Deserialize;
use tollgate_chain::{Exchange, Matched, Next, PluginError, Response, RulePlugin};
use tollgate_model::result::messages;
use tollgate_model::{BuiltinPlugin, PluginRole, ResultEnvelope};
use tollgate_telemetry::log_plugin_short_circuit;

const REJECT_STATUS: u16 = 403;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WafHandle {
    #[serde(default)]
    pub permission: String,
    /// Envelope code for rejections. Accepts a number or a numeric string.
    #[serde(default)]
    pub status_code: Option<serde_json::Value>,
}

impl WafHandle {
    pub fn rejects(&self) -> bool {
        self.permission.trim().eq_ignore_ascii_case("reject")
    }

    fn code(&self) -> i32 {
        let parsed = match &self.status_code {
            Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.unwrap_or(i32::from(REJECT_STATUS))
    }
}

#[derive(Debug, Default)]
pub struct WafPlugin;

impl WafPlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RulePlugin for WafPlugin {
    fn name(&self) -> &'static str {
        BuiltinPlugin::Waf.name()
    }

    fn order(&self) -> i32 {
        BuiltinPlugin::Waf.order()
    }

    fn role(&self) -> PluginRole {
        PluginRole::Before
    }

    async fn handle(
        &self,
        exchange: &mut Exchange,
        matched: Matched,
        next: Next<'_>,
    ) -> Result<(), PluginError> {
        let handle: WafHandle = match matched.rule.data.decode_handle() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(plugin = self.name(), error = %e, "waf rule ignored");
                return next.run(exchange).await;
            }
        };
        if handle.permission.trim().is_empty() {
            tracing::warn!(plugin = self.name(), rule = %matched.rule_id(), "waf rule has no permission");
            return next.run(exchange).await;
        }
        if !handle.rejects() {
            return next.run(exchange).await;
        }

        log_plugin_short_circuit!(
            plugin = self.name(),
            rule = %matched.rule_id(),
            request_id = %exchange.request_id(),
            "request rejected by waf"
        );
        let envelope = ResultEnvelope::error(handle.code(), messages::REJECTED);
        exchange.respond(self.name(), Response::envelope(REJECT_STATUS, &envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tollgate_cache::{ConfigCache, ConfigSnapshot};
    use tollgate_chain::{ChainOutcome, PluginChain, RuleDriven};
    use tollgate_model::{RequestDescriptor, RpcType};

    fn chain(handle: &str) -> PluginChain {
        let yaml = format!(
            r#"
plugins:
  - id: "1"
    name: waf
selectors:
  - id: s1
    pluginId: "1"
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
    handle: {handle}
"#
        );
        let cache = Arc::new(ConfigCache::new());
        ConfigSnapshot::from_yaml(&yaml).unwrap().apply_to(&cache);
        PluginChain::new(vec![Arc::new(RuleDriven::new(WafPlugin::new(), cache))])
    }

    fn pdm_request() -> Exchange {
        Exchange::new(
            RequestDescriptor::new("pdm", "save", RpcType::Http).with_post_param("module", "pdm"),
        )
    }

    fn body(exchange: &Exchange) -> serde_json::Value {
        serde_json::from_slice(&exchange.response().unwrap().body).unwrap()
    }

    #[tokio::test]
    async fn reject_short_circuits_with_403() {
        let chain = chain(r#"{permission: reject, statusCode: "403"}"#);
        let mut ex = pdm_request();
        let outcome = chain.execute(&mut ex).await;
        assert!(matches!(outcome, ChainOutcome::ShortCircuited { ref plugin } if plugin == "waf"));
        assert_eq!(ex.response().unwrap().status, 403);
        let body = body(&ex);
        assert_eq!(body["code"], 403);
        assert_eq!(body["message"], "rejected");
    }

    #[tokio::test]
    async fn envelope_code_follows_status_code() {
        let chain = chain("{permission: REJECT, statusCode: 451}");
        let mut ex = pdm_request();
        chain.execute(&mut ex).await;
        assert_eq!(ex.response().unwrap().status, 403);
        assert_eq!(body(&ex)["code"], 451);
    }

    #[tokio::test]
    async fn allow_continues() {
        let chain = chain("{permission: allow}");
        let mut ex = pdm_request();
        assert!(chain.execute(&mut ex).await.is_completed());
        assert!(!ex.has_response());
    }

    #[tokio::test]
    async fn blank_handle_fails_open() {
        let chain = chain("{}");
        let mut ex = pdm_request();
        assert!(chain.execute(&mut ex).await.is_completed());
    }

    #[tokio::test]
    async fn unmatched_request_passes() {
        let chain = chain("{permission: reject}");
        let mut ex = Exchange::new(RequestDescriptor::new("crm", "save", RpcType::Http));
        assert!(chain.execute(&mut ex).await.is_completed());
    }

    #[test]
    fn permission_matching_ignores_case_only() {
        let handle = |permission: &str| WafHandle {
            permission: permission.to_string(),
            status_code: None,
        };
        assert!(handle("reject").rejects());
        assert!(handle("REJECT").rejects());
        assert!(handle(" Reject ").rejects());
        assert!(!handle("rejected").rejects());
        assert!(!handle("allow").rejects());
    }
}
