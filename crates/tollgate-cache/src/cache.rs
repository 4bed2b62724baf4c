//! The in-memory configuration cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tollgate_model::{PluginData, RuleData, SelectorData};
use tollgate_router::{RequestView, Rule, RuleSet, Selector, SelectorSet};

use crate::error::CacheError;
use crate::path::{ConfigKind, ConfigPath};

type Mapping<T> = ArcSwap<HashMap<String, Arc<T>>>;

/// Result of a successfully applied change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied,
    /// `existed` is false when the key was already absent.
    Deleted { existed: bool },
}

/// Entry counts, for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub plugins: usize,
    pub selectors: usize,
    pub rules: usize,
}

/// Plugin descriptors, selectors and rules, read lock-free by every request.
///
/// Each mapping is an immutable `HashMap` behind an [`ArcSwap`]. A change
/// copies the map, replaces one key and swaps the new map in, so a reader
/// holding a snapshot sees either the old or the new value for that key and
/// never a partially built one. Selector and rule lists are compiled and
/// sorted once here, at write time.
///
/// Until [`mark_initialized`](Self::mark_initialized) is called every lookup
/// misses, which the request path treats as "nothing configured".
pub struct ConfigCache {
    plugins: Mapping<PluginData>,
    selectors: Mapping<SelectorSet>,
    rules: Mapping<RuleSet>,
    initialized: AtomicBool,
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigCache {
    pub fn new() -> Self {
        Self {
            plugins: ArcSwap::from_pointee(HashMap::new()),
            selectors: ArcSwap::from_pointee(HashMap::new()),
            rules: ArcSwap::from_pointee(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Apply a change notification for a store path.
    pub fn apply_path(
        &self,
        path: &str,
        payload: Option<&[u8]>,
    ) -> Result<ChangeOutcome, CacheError> {
        let parsed = ConfigPath::parse(path).ok_or_else(|| {
            tracing::warn!(path = %path, "ignoring change for unrecognized path");
            CacheError::UnknownPath(path.to_string())
        })?;
        self.apply_change(parsed.kind, &parsed.key, payload)
    }

    /// Replace (`Some`) or remove (`None`) the value stored under `key`.
    ///
    /// A payload that does not deserialize is dropped and the previous value
    /// stays in place.
    pub fn apply_change(
        &self,
        kind: ConfigKind,
        key: &str,
        payload: Option<&[u8]>,
    ) -> Result<ChangeOutcome, CacheError> {
        let Some(bytes) = payload else {
            let existed = match kind {
                ConfigKind::Plugin => remove(&self.plugins, key),
                ConfigKind::Selector => remove(&self.selectors, key),
                ConfigKind::Rule => remove(&self.rules, key),
            };
            return Ok(ChangeOutcome::Deleted { existed });
        };

        let malformed = |source: serde_json::Error| {
            tracing::warn!(
                kind = %kind,
                key = %key,
                error = %source,
                "dropping malformed config payload, keeping previous value"
            );
            CacheError::Malformed {
                kind,
                key: key.to_string(),
                source,
            }
        };

        match kind {
            ConfigKind::Plugin => {
                let plugin: PluginData = serde_json::from_slice(bytes).map_err(malformed)?;
                upsert(&self.plugins, key, Arc::new(plugin));
            }
            ConfigKind::Selector => {
                let selectors: Vec<SelectorData> =
                    serde_json::from_slice(bytes).map_err(malformed)?;
                upsert(&self.selectors, key, Arc::new(SelectorSet::new(selectors)));
            }
            ConfigKind::Rule => {
                let rules: Vec<RuleData> = serde_json::from_slice(bytes).map_err(malformed)?;
                upsert(&self.rules, key, Arc::new(RuleSet::new(rules)));
            }
        }
        Ok(ChangeOutcome::Applied)
    }

    /// Store a plugin descriptor under its name.
    pub fn put_plugin(&self, plugin: PluginData) {
        let name = plugin.name.clone();
        upsert(&self.plugins, &name, Arc::new(plugin));
    }

    /// Replace the selector list of a plugin.
    pub fn put_selectors(&self, plugin_id: &str, selectors: Vec<SelectorData>) {
        upsert(&self.selectors, plugin_id, Arc::new(SelectorSet::new(selectors)));
    }

    /// Replace the rule list of a selector.
    pub fn put_rules(&self, selector_id: &str, rules: Vec<RuleData>) {
        upsert(&self.rules, selector_id, Arc::new(RuleSet::new(rules)));
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<PluginData>> {
        if !self.is_initialized() {
            return None;
        }
        self.plugins.load().get(name).cloned()
    }

    pub fn selectors(&self, plugin_id: &str) -> Option<Arc<SelectorSet>> {
        if !self.is_initialized() {
            return None;
        }
        self.selectors.load().get(plugin_id).cloned()
    }

    pub fn rules(&self, selector_id: &str) -> Option<Arc<RuleSet>> {
        if !self.is_initialized() {
            return None;
        }
        self.rules.load().get(selector_id).cloned()
    }

    /// First matching selector for a plugin. Evaluates against one snapshot.
    pub fn resolve_selector<V: RequestView + ?Sized>(
        &self,
        plugin_id: &str,
        view: &V,
    ) -> Option<Arc<Selector>> {
        self.selectors(plugin_id)?.resolve(view)
    }

    /// First matching rule under `selector`. Evaluates against one snapshot.
    pub fn resolve_rule<V: RequestView + ?Sized>(
        &self,
        selector: &Selector,
        view: &V,
    ) -> Option<Arc<Rule>> {
        self.rules(selector.id())?
            .resolve(selector.data.selector_type, view)
    }

    /// Keys currently stored for `kind`.
    pub fn keys(&self, kind: ConfigKind) -> Vec<String> {
        match kind {
            ConfigKind::Plugin => self.plugins.load().keys().cloned().collect(),
            ConfigKind::Selector => self.selectors.load().keys().cloned().collect(),
            ConfigKind::Rule => self.rules.load().keys().cloned().collect(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            plugins: self.plugins.load().len(),
            selectors: self.selectors.load().values().map(|s| s.len()).sum(),
            rules: self.rules.load().values().map(|r| r.len()).sum(),
        }
    }
}

fn upsert<T>(map: &Mapping<T>, key: &str, value: Arc<T>) {
    map.rcu(|current| {
        let mut next = HashMap::clone(current);
        next.insert(key.to_string(), Arc::clone(&value));
        next
    });
}

fn remove<T>(map: &Mapping<T>, key: &str) -> bool {
    let mut existed = false;
    map.rcu(|current| {
        let mut next = HashMap::clone(current);
        existed = next.remove(key).is_some();
        next
    });
    existed
}
