//! Keeps a [`ConfigCache`] in step with a [`ConfigStore`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::cache::{ChangeOutcome, ConfigCache};
use crate::error::{CacheError, StoreError};
use crate::path::{ConfigKind, ConfigPath};
use crate::store::{ConfigEvent, ConfigStore};

const RESYNC_BACKOFF_MIN: Duration = Duration::from_millis(50);
const RESYNC_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Called once per applied, deleted or rejected node.
pub type UpdateListener = Arc<dyn Fn(ConfigKind, &'static str) + Send + Sync>;

/// Loads the full configuration once, then follows store notifications.
pub struct ConfigSync {
    store: Arc<dyn ConfigStore>,
    cache: Arc<ConfigCache>,
    listener: Option<UpdateListener>,
}

impl ConfigSync {
    pub fn new(store: Arc<dyn ConfigStore>, cache: Arc<ConfigCache>) -> Self {
        Self {
            store,
            cache,
            listener: None,
        }
    }

    /// Observe every update outcome (`applied`, `deleted`, `rejected`).
    pub fn with_listener(mut self, listener: UpdateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Read every node from the store into the cache and mark it initialized.
    ///
    /// Keys the cache holds that the store no longer has are removed, so
    /// this doubles as a full resync.
    pub async fn load_all(&self) -> Result<usize, StoreError> {
        let mut loaded = 0;
        for kind in ConfigKind::ALL {
            let nodes = self.store.list(&kind.prefix()).await?;
            let mut present = HashSet::with_capacity(nodes.len());
            for (path, value) in nodes {
                if let Some(parsed) = ConfigPath::parse(&path) {
                    present.insert(parsed.key);
                }
                if self.apply(&path, Some(&value)).is_ok() {
                    loaded += 1;
                }
            }
            for stale in self.cache.keys(kind) {
                if !present.contains(&stale) {
                    let path = ConfigPath::new(kind, stale).to_string();
                    let _ = self.apply(&path, None);
                }
            }
        }
        self.cache.mark_initialized();
        Ok(loaded)
    }

    /// Initial load, then apply changes until `shutdown` flips to true or
    /// the store's notification channel closes.
    ///
    /// A failed load is retried with backoff; the sync never gives up while
    /// the gateway is running.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // Subscribe before loading so nothing between the two is missed.
        let mut events = self.store.watch();
        if !self.resync(&mut shutdown).await {
            return;
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("configuration sync shutting down");
                        return;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.apply_event(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed = missed, "configuration watch lagged, reloading");
                        if !self.resync(&mut shutdown).await {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("configuration store closed its watch channel");
                        return;
                    }
                },
            }
        }
    }

    /// Full reload, retried until it succeeds. Returns false if shutdown
    /// was requested first.
    async fn resync(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut backoff = RESYNC_BACKOFF_MIN;
        loop {
            match self.load_all().await {
                Ok(loaded) => {
                    tracing::info!(nodes = loaded, "configuration loaded");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "configuration reload failed"
                    );
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
            backoff = (backoff * 2).min(RESYNC_BACKOFF_MAX);
        }
    }

    pub fn apply_event(&self, event: &ConfigEvent) {
        let _ = self.apply(&event.path, event.payload());
    }

    fn apply(&self, path: &str, payload: Option<&[u8]>) -> Result<ChangeOutcome, CacheError> {
        let result = self.cache.apply_path(path, payload);
        let kind = ConfigPath::parse(path).map(|p| p.kind);
        match (&result, kind) {
            (Ok(ChangeOutcome::Applied), Some(kind)) => {
                tracing::debug!(path = %path, "config node applied");
                self.notify(kind, "applied");
            }
            (Ok(ChangeOutcome::Deleted { .. }), Some(kind)) => {
                tracing::debug!(path = %path, "config node deleted");
                self.notify(kind, "deleted");
            }
            (Err(_), Some(kind)) => self.notify(kind, "rejected"),
            _ => {}
        }
        result
    }

    fn notify(&self, kind: ConfigKind, outcome: &'static str) {
        if let Some(listener) = &self.listener {
            listener(kind, outcome);
        }
    }
}
