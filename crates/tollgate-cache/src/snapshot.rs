//! YAML configuration snapshots.
//!
//! A snapshot file lists plugins, selectors and rules flat. Publishing
//! groups them into store nodes (selectors by plugin id, rules by selector
//! id) and writes only what changed, so a watched file feeds the cache
//! through the same notification path a remote store would.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tollgate_model::{PluginData, RuleData, SelectorData};

use crate::cache::ConfigCache;
use crate::error::SnapshotError;
use crate::path::{ConfigKind, ConfigPath};
use crate::store::ConfigStore;

/// Quiet period after a file event before the snapshot is re-read.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Plugins, selectors and rules as written in a snapshot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub plugins: Vec<PluginData>,
    #[serde(default)]
    pub selectors: Vec<SelectorData>,
    #[serde(default)]
    pub rules: Vec<RuleData>,
}

/// What a publish changed in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub written: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ConfigSnapshot {
    pub fn from_yaml(source: &str) -> Result<Self, SnapshotError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Read, parse and validate a snapshot file.
    pub async fn load(path: &Path) -> Result<Self, SnapshotError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let snapshot = Self::from_yaml(&source)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check identities are unique and references resolve.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut names = HashSet::new();
        let mut plugin_ids = HashSet::new();
        for plugin in &self.plugins {
            if !names.insert(plugin.name.as_str()) {
                return Err(invalid(format!("duplicate plugin name '{}'", plugin.name)));
            }
            if !plugin_ids.insert(plugin.id.as_str()) {
                return Err(invalid(format!("duplicate plugin id '{}'", plugin.id)));
            }
        }

        let mut selector_ids = HashSet::new();
        for selector in &self.selectors {
            if !plugin_ids.contains(selector.plugin_id.as_str()) {
                return Err(invalid(format!(
                    "selector '{}' references unknown plugin id '{}'",
                    selector.id, selector.plugin_id
                )));
            }
            if !selector_ids.insert(selector.id.as_str()) {
                return Err(invalid(format!("duplicate selector id '{}'", selector.id)));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            if !selector_ids.contains(rule.selector_id.as_str()) {
                return Err(invalid(format!(
                    "rule '{}' references unknown selector id '{}'",
                    rule.id, rule.selector_id
                )));
            }
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(invalid(format!("duplicate rule id '{}'", rule.id)));
            }
        }
        Ok(())
    }

    /// Load this snapshot straight into `cache`, bypassing any store, and
    /// mark it initialized.
    pub fn apply_to(&self, cache: &ConfigCache) {
        for plugin in &self.plugins {
            cache.put_plugin(plugin.clone());
        }

        let mut by_plugin: BTreeMap<&str, Vec<SelectorData>> = BTreeMap::new();
        for selector in &self.selectors {
            by_plugin
                .entry(selector.plugin_id.as_str())
                .or_default()
                .push(selector.clone());
        }
        for (plugin_id, selectors) in by_plugin {
            cache.put_selectors(plugin_id, selectors);
        }

        let mut by_selector: BTreeMap<&str, Vec<RuleData>> = BTreeMap::new();
        for rule in &self.rules {
            by_selector
                .entry(rule.selector_id.as_str())
                .or_default()
                .push(rule.clone());
        }
        for (selector_id, rules) in by_selector {
            cache.put_rules(selector_id, rules);
        }

        cache.mark_initialized();
    }

    /// Store nodes for this snapshot, keyed by path.
    pub fn to_nodes(&self) -> Result<BTreeMap<String, Bytes>, SnapshotError> {
        let mut nodes = BTreeMap::new();

        for plugin in &self.plugins {
            let path = ConfigPath::new(ConfigKind::Plugin, plugin.name.as_str());
            nodes.insert(path.to_string(), Bytes::from(serde_json::to_vec(plugin)?));
        }

        let mut by_plugin: BTreeMap<&str, Vec<&SelectorData>> = BTreeMap::new();
        for selector in &self.selectors {
            by_plugin
                .entry(selector.plugin_id.as_str())
                .or_default()
                .push(selector);
        }
        for (plugin_id, selectors) in by_plugin {
            let path = ConfigPath::new(ConfigKind::Selector, plugin_id);
            nodes.insert(path.to_string(), Bytes::from(serde_json::to_vec(&selectors)?));
        }

        let mut by_selector: BTreeMap<&str, Vec<&RuleData>> = BTreeMap::new();
        for rule in &self.rules {
            by_selector
                .entry(rule.selector_id.as_str())
                .or_default()
                .push(rule);
        }
        for (selector_id, rules) in by_selector {
            let path = ConfigPath::new(ConfigKind::Rule, selector_id);
            nodes.insert(path.to_string(), Bytes::from(serde_json::to_vec(&rules)?));
        }

        Ok(nodes)
    }

    /// Make the store hold exactly this snapshot's nodes.
    pub async fn publish(&self, store: &dyn ConfigStore) -> Result<PublishSummary, SnapshotError> {
        let nodes = self.to_nodes()?;

        let mut existing = HashMap::new();
        for kind in ConfigKind::ALL {
            existing.extend(store.list(&kind.prefix()).await?);
        }

        let mut summary = PublishSummary::default();
        for (path, value) in &nodes {
            if existing.get(path) == Some(value) {
                summary.unchanged += 1;
                continue;
            }
            store.put(path, value.clone()).await?;
            summary.written += 1;
        }
        for path in existing.keys() {
            if !nodes.contains_key(path) && store.delete(path).await? {
                summary.deleted += 1;
            }
        }
        Ok(summary)
    }
}

fn invalid(message: String) -> SnapshotError {
    SnapshotError::Invalid(message)
}

/// Re-publish `path` into `store` whenever the file changes.
///
/// The parent directory is watched so editors that save by renaming a
/// temporary file over the original are picked up. A snapshot that fails
/// to load is logged and the store keeps its current contents.
pub fn watch_file(
    path: PathBuf,
    store: Arc<dyn ConfigStore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, SnapshotError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<notify::Event>| {
            if let Ok(event) = result {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    )?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    tracing::info!(path = %path.display(), "watching configuration snapshot");

    Ok(tokio::spawn(async move {
        // Dropping the watcher stops the notifications.
        let _watcher = watcher;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else { return };
                    if !concerns(&event, &path) {
                        continue;
                    }
                    tokio::time::sleep(DEBOUNCE).await;
                    while rx.try_recv().is_ok() {}
                    reload(&path, store.as_ref()).await;
                }
            }
        }
    }))
}

fn concerns(event: &notify::Event, path: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == path.file_name())
}

async fn reload(path: &Path, store: &dyn ConfigStore) {
    let snapshot = match ConfigSnapshot::load(path).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "configuration snapshot rejected, keeping current configuration"
            );
            return;
        }
    };
    match snapshot.publish(store).await {
        Ok(summary) => tracing::info!(
            path = %path.display(),
            written = summary.written,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            "configuration snapshot published"
        ),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to publish configuration snapshot"
        ),
    }
}
