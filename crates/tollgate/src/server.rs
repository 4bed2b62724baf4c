//! Listener loop and gateway lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tollgate_cache::{ConfigCache, ConfigStore, ConfigSync};
use tollgate_telemetry::MetricsRegistry;

use crate::config::GatewayConfig;
use crate::gateway::{Gateway, GatewayError};

/// Accept connections until `shutdown` flips to true. Open connections
/// are asked to finish their in-flight request and close.
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("listener stopped");
                    return;
                }
                continue;
            }
        };

        let gateway = Arc::clone(&gateway);
        let mut conn_shutdown = shutdown.clone();
        gateway.metrics().connection_opened();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service_gateway = Arc::clone(&gateway);
            let service = service_fn(move |req| {
                let gateway = Arc::clone(&service_gateway);
                async move { gateway.handle_request(req, Some(remote)).await }
            });

            let conn = http1::Builder::new().serve_connection(io, service);
            tokio::pin!(conn);
            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = conn_shutdown.changed() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(e) = result {
                tracing::debug!(remote = %remote, error = %e, "connection error");
            }
            gateway.metrics().connection_closed();
        });
    }
}

/// A started gateway: configuration sync plus the listener. Dropping it
/// stops both without waiting.
pub struct RunningGateway {
    local_addr: SocketAddr,
    cache: Arc<ConfigCache>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    /// A receiver that flips to true when shutdown begins.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Stop accepting, stop following the store and wait for both.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "gateway task ended abnormally");
            }
        }
    }
}

/// Load configuration from `store`, then serve on `listener`.
///
/// The cache is fully loaded before the first connection is accepted.
pub async fn start(
    config: &GatewayConfig,
    store: Arc<dyn ConfigStore>,
    metrics: Arc<MetricsRegistry>,
    listener: TcpListener,
) -> Result<RunningGateway, GatewayError> {
    let local_addr = listener.local_addr()?;
    let cache = Arc::new(ConfigCache::new());

    let listener_metrics = Arc::clone(&metrics);
    let sync = ConfigSync::new(store, Arc::clone(&cache)).with_listener(Arc::new(
        move |kind, outcome| {
            listener_metrics.record_config_update(kind.as_str(), outcome);
            if outcome == "rejected" {
                tollgate_telemetry::log_config_rejected!(
                    kind = kind.as_str(),
                    "configuration update rejected"
                );
            } else {
                tollgate_telemetry::log_config_applied!(
                    kind = kind.as_str(),
                    outcome = outcome,
                    "configuration updated"
                );
            }
        },
    ));
    let loaded = sync.load_all().await?;
    tracing::info!(nodes = loaded, "initial configuration loaded");

    let gateway = Arc::new(Gateway::build(config, Arc::clone(&cache), metrics)?);
    let (shutdown, shutdown_rx) = watch::channel(false);

    let sync_shutdown = shutdown_rx.clone();
    let sync_task = tokio::spawn(sync.run(sync_shutdown));
    let serve_task = tokio::spawn(serve(listener, gateway, shutdown_rx));

    Ok(RunningGateway {
        local_addr,
        cache,
        shutdown,
        tasks: vec![sync_task, serve_task],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_cache::{ConfigSnapshot, MemoryStore};

    #[tokio::test]
    async fn serves_health_and_shuts_down() {
        let store = Arc::new(MemoryStore::new());
        ConfigSnapshot::from_yaml("plugins: [{id: '1', name: waf}]")
            .unwrap()
            .publish(store.as_ref())
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = start(
            &GatewayConfig::default(),
            store,
            Arc::new(MetricsRegistry::new()),
            listener,
        )
        .await
        .unwrap();
        assert!(running.cache().is_initialized());
        assert!(running.cache().plugin("waf").is_some());

        let url = format!("http://{}/__tollgate/health", running.local_addr());
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["plugins"], 1);

        running.shutdown().await;
        assert!(reqwest::get(&url).await.is_err());
    }
}
