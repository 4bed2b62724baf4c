//! Plugin descriptors and the catalogue of built-in plugins.

use serde::{Deserialize, Serialize};

/// Intended placement of a plugin in the request lifecycle.
///
/// Informational only: execution order is decided by each plugin's
/// numeric order, never by its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginRole {
    /// Access checks that run before any routing work.
    Before,
    /// Routing, limiting and proxying.
    Function,
    /// Bookkeeping after the upstream call.
    After,
}

/// A plugin as configured by operators.
///
/// `name` is the stable identity used as a cache key; `id` links the
/// plugin to its selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginData {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_role")]
    pub role: PluginRole,
}

fn default_enabled() -> bool {
    true
}

fn default_role() -> PluginRole {
    PluginRole::Function
}

impl PluginData {
    /// Create an enabled plugin descriptor.
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: PluginRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            role,
        }
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Plugins shipped with the gateway, with their names and execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinPlugin {
    Waf,
    RateLimiter,
    Rewrite,
    Divide,
    Dubbo,
    SpringCloud,
    Monitor,
    Response,
}

impl BuiltinPlugin {
    /// Every built-in plugin, in execution order.
    pub const ALL: [BuiltinPlugin; 8] = [
        BuiltinPlugin::Waf,
        BuiltinPlugin::RateLimiter,
        BuiltinPlugin::Rewrite,
        BuiltinPlugin::Divide,
        BuiltinPlugin::Dubbo,
        BuiltinPlugin::SpringCloud,
        BuiltinPlugin::Monitor,
        BuiltinPlugin::Response,
    ];

    /// Stable plugin name, also used as the configuration key.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinPlugin::Waf => "waf",
            BuiltinPlugin::RateLimiter => "rate_limiter",
            BuiltinPlugin::Rewrite => "rewrite",
            BuiltinPlugin::Divide => "divide",
            BuiltinPlugin::Dubbo => "dubbo",
            BuiltinPlugin::SpringCloud => "springCloud",
            BuiltinPlugin::Monitor => "monitor",
            BuiltinPlugin::Response => "response",
        }
    }

    /// Global execution priority; lower runs first.
    pub fn order(&self) -> i32 {
        match self {
            BuiltinPlugin::Waf => 10,
            BuiltinPlugin::RateLimiter => 20,
            BuiltinPlugin::Rewrite => 30,
            BuiltinPlugin::Divide => 50,
            BuiltinPlugin::Dubbo => 60,
            BuiltinPlugin::SpringCloud => 70,
            BuiltinPlugin::Monitor => 80,
            BuiltinPlugin::Response => 100,
        }
    }

    /// Documented lifecycle placement.
    pub fn role(&self) -> PluginRole {
        match self {
            BuiltinPlugin::Waf => PluginRole::Before,
            BuiltinPlugin::Monitor | BuiltinPlugin::Response => PluginRole::After,
            _ => PluginRole::Function,
        }
    }

    /// Look up a built-in plugin by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }
}
