//! TestGateway: full-stack integration test harness.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tollgate_cache::{
    ConfigCache, ConfigSnapshot, ConfigStore, MemoryStore, PublishSummary, SnapshotError,
};
use tollgate_lib::{start, GatewayConfig, GatewayError, RunningGateway};
use tollgate_telemetry::MetricsRegistry;

/// Errors from TestGateway operations.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway failed to start: {0}")]
    StartupFailed(String),
}

/// Full-stack test harness.
///
/// Boots the data plane in-process on a random port, fed from an in-memory
/// store, and provides HTTP request helpers. Publishing a new snapshot goes
/// through the same store notifications a production deployment uses.
/// Dropping the harness stops the gateway.
pub struct TestGateway {
    running: Option<RunningGateway>,
    store: Arc<MemoryStore>,
    client: reqwest::Client,
    base_url: String,
}

impl TestGateway {
    /// Start a gateway in dev mode with the given rule snapshot.
    pub async fn from_snapshot_yaml(snapshot: &str) -> Result<Self, TestError> {
        let config = GatewayConfig {
            dev: true,
            ..GatewayConfig::default()
        };
        Self::with_config(snapshot, config).await
    }

    /// Start a gateway with an explicit config. The listen address is
    /// always replaced by an ephemeral local port.
    pub async fn with_config(snapshot: &str, config: GatewayConfig) -> Result<Self, TestError> {
        let snapshot = ConfigSnapshot::from_yaml(snapshot)?;
        snapshot.validate()?;
        let store = Arc::new(MemoryStore::new());
        snapshot.publish(store.as_ref()).await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let shared: Arc<dyn ConfigStore> = store.clone();
        let running = start(
            &config,
            shared,
            Arc::new(MetricsRegistry::new()),
            listener,
        )
        .await?;
        if !running.cache().is_initialized() {
            return Err(TestError::StartupFailed(
                "configuration cache was not initialized".to_string(),
            ));
        }

        let base_url = format!("http://{}", running.local_addr());
        Ok(Self {
            running: Some(running),
            store,
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// Get the base URL of the gateway.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cache(&self) -> Option<&Arc<ConfigCache>> {
        self.running.as_ref().map(RunningGateway::cache)
    }

    /// Replace the published configuration and wait until the gateway's
    /// cache reflects it.
    pub async fn publish(&self, snapshot: &str) -> Result<PublishSummary, TestError> {
        let snapshot = ConfigSnapshot::from_yaml(snapshot)?;
        snapshot.validate()?;
        let summary = snapshot.publish(self.store.as_ref()).await?;

        let Some(cache) = self.cache() else {
            return Err(TestError::StartupFailed("gateway already stopped".to_string()));
        };
        for _ in 0..100 {
            if in_sync(cache, &snapshot) {
                return Ok(summary);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(TestError::StartupFailed(
            "published snapshot never reached the cache".to_string(),
        ))
    }

    /// Make a GET request to the given path.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, TestError> {
        let url = format!("{}{}", self.base_url, path);
        Ok(self.client.get(&url).send().await?)
    }

    /// Make a POST request with a JSON body to the given path.
    pub async fn post(&self, path: &str, body: &str) -> Result<reqwest::Response, TestError> {
        let url = format!("{}{}", self.base_url, path);
        Ok(self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await?)
    }

    /// A POST to `/` addressed to `module`/`method` over HTTP. Callers may
    /// add headers or a body before sending.
    pub fn dispatch(&self, module: &str, method: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/", self.base_url))
            .header("module", module)
            .header("method", method)
            .header("rpcType", "http")
    }

    /// Stop the gateway and wait for its tasks.
    pub async fn shutdown(mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown().await;
        }
    }
}

fn in_sync(cache: &ConfigCache, snapshot: &ConfigSnapshot) -> bool {
    let stats = cache.stats();
    if stats.plugins != snapshot.plugins.len()
        || stats.selectors != snapshot.selectors.len()
        || stats.rules != snapshot.rules.len()
    {
        return false;
    }
    let plugins = snapshot
        .plugins
        .iter()
        .all(|p| cache.plugin(&p.name).is_some_and(|cached| *cached == *p));
    let selectors = snapshot.selectors.iter().all(|s| {
        cache
            .selectors(&s.plugin_id)
            .is_some_and(|set| set.iter().any(|cached| cached.data == *s))
    });
    let rules = snapshot.rules.iter().all(|r| {
        cache
            .rules(&r.selector_id)
            .is_some_and(|set| set.iter().any(|cached| cached.data == *r))
    });
    plugins && selectors && rules
}
