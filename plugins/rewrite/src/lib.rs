//! Rewrite plugin: sets the path proxy plugins call instead of the
//! request's method name.

use async_trait::async_trait;
use serde::Deserialize;
use tollgate_chain::{Exchange, Matched, Next, PluginError, RewriteUri, RulePlugin};
use tollgate_model::{BuiltinPlugin, RpcType};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewriteHandle {
    #[serde(rename = "rewriteURI", alias = "rewriteUri", default)]
    pub rewrite_uri: String,
}

#[derive(Debug, Default)]
pub struct RewritePlugin;

impl RewritePlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RulePlugin for RewritePlugin {
    fn name(&self) -> &'static str {
        BuiltinPlugin::Rewrite.name()
    }

    fn order(&self) -> i32 {
        BuiltinPlugin::Rewrite.order()
    }

    /// Dubbo requests address an interface method, not a path.
    fn skip(&self, exchange: &Exchange) -> bool {
        exchange.request().rpc_type == RpcType::Dubbo
    }

    async fn handle(
        &self,
        exchange: &mut Exchange,
        matched: Matched,
        next: Next<'_>,
    ) -> Result<(), PluginError> {
        match matched.rule.data.decode_handle::<RewriteHandle>() {
            Ok(handle) if !handle.rewrite_uri.trim().is_empty() => {
                tracing::debug!(
                    plugin = self.name(),
                    rule = %matched.rule_id(),
                    target = %handle.rewrite_uri,
                    "rewriting target path"
                );
                exchange.insert(RewriteUri(handle.rewrite_uri.trim().to_string()));
            }
            Ok(_) => {
                tracing::warn!(plugin = self.name(), rule = %matched.rule_id(), "rewrite target is blank");
            }
            Err(e) => {
                tracing::warn!(plugin = self.name(), error = %e, "rewrite rule ignored");
            }
        }
        next.run(exchange).await
    }
}
