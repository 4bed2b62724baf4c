//! Response plugin: turns the proxied result into the client response.
//!
//! Runs last. An earlier response (a rejection or a proxy fallback) is
//! left alone; otherwise the upstream response stored by a proxy plugin is
//! written, or a 502 envelope when no proxy handled the request.

use async_trait::async_trait;
use tollgate_chain::{Exchange, Next, Plugin, PluginError, Response, UpstreamResponse};
use tollgate_model::result::messages;
use tollgate_model::{BuiltinPlugin, PluginRole};

#[derive(Debug, Default)]
pub struct ResponsePlugin;

impl ResponsePlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for ResponsePlugin {
    fn name(&self) -> &str {
        BuiltinPlugin::Response.name()
    }

    fn order(&self) -> i32 {
        BuiltinPlugin::Response.order()
    }

    fn role(&self) -> PluginRole {
        PluginRole::After
    }

    async fn execute(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), PluginError> {
        if !exchange.has_response() {
            let response = match exchange.remove::<UpstreamResponse>() {
                Some(upstream) => Response::from(upstream),
                None => {
                    tracing::debug!(
                        request_id = %exchange.request_id(),
                        module = %exchange.request().module,
                        "no proxy handled the request"
                    );
                    Response::error(502, messages::NO_UPSTREAM)
                }
            };
            exchange.respond(self.name(), response)?;
        }
        next.run(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use tollgate_chain::PluginChain;
    use tollgate_model::{RequestDescriptor, RpcType};

    fn run_chain() -> PluginChain {
        PluginChain::new(vec![Arc::new(ResponsePlugin::new())])
    }

    fn exchange() -> Exchange {
        Exchange::new(RequestDescriptor::new("orders", "list", RpcType::Http))
    }

    #[tokio::test]
    async fn writes_upstream_response() {
        let mut ex = exchange();
        ex.insert(UpstreamResponse {
            status: 201,
            headers: vec![("x-upstream".into(), "a".into())],
            body: Bytes::from_static(b"created"),
        });

        assert!(run_chain().execute(&mut ex).await.is_completed());
        let response = ex.response().unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.header("x-upstream"), Some("a"));
        assert_eq!(&response.body[..], b"created");
        assert!(ex.get::<UpstreamResponse>().is_none());
    }

    #[tokio::test]
    async fn nothing_proxied_is_502() {
        let mut ex = exchange();
        assert!(run_chain().execute(&mut ex).await.is_completed());
        let response = ex.response().unwrap();
        assert_eq!(response.status, 502);
        let body = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(body.contains("\"code\":502"));
    }

    #[tokio::test]
    async fn earlier_response_is_kept() {
        let mut ex = exchange();
        ex.respond("divide", Response::error(504, messages::GATEWAY_TIMEOUT))
            .unwrap();
        ex.insert(UpstreamResponse {
            status: 200,
            headers: Vec::new(),
            body: Bytes::new(),
        });

        assert!(run_chain().execute(&mut ex).await.is_completed());
        assert_eq!(ex.response().unwrap().status, 504);
    }
}
