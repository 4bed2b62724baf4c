//! Coordination store path layout.
//!
//! ```text
//! /tollgate/plugin/{pluginName}    -> PluginData
//! /tollgate/selector/{pluginId}    -> [SelectorData]
//! /tollgate/rule/{selectorId}      -> [RuleData]
//! ```

use std::fmt;

/// Root every Tollgate node lives under.
pub const ROOT: &str = "/tollgate";

/// The three cached mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Plugin,
    Selector,
    Rule,
}

impl ConfigKind {
    pub const ALL: [ConfigKind; 3] = [ConfigKind::Plugin, ConfigKind::Selector, ConfigKind::Rule];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Plugin => "plugin",
            ConfigKind::Selector => "selector",
            ConfigKind::Rule => "rule",
        }
    }

    /// Prefix for every node of this kind, trailing slash included.
    pub fn prefix(&self) -> String {
        format!("{}/{}/", ROOT, self.as_str())
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "plugin" => Some(ConfigKind::Plugin),
            "selector" => Some(ConfigKind::Selector),
            "rule" => Some(ConfigKind::Rule),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed node path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigPath {
    pub kind: ConfigKind,
    pub key: String,
}

impl ConfigPath {
    pub fn new(kind: ConfigKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    /// Parse `/tollgate/{kind}/{key}`. Keys may not contain `/`.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(ROOT)?.strip_prefix('/')?;
        let (kind, key) = rest.split_once('/')?;
        if key.is_empty() || key.contains('/') {
            return None;
        }
        Some(Self::new(ConfigKind::from_segment(kind)?, key))
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", ROOT, self.kind, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format() {
        let path = ConfigPath::parse("/tollgate/selector/p-1").unwrap();
        assert_eq!(path.kind, ConfigKind::Selector);
        assert_eq!(path.key, "p-1");
        assert_eq!(path.to_string(), "/tollgate/selector/p-1");
    }

    #[test]
    fn rejects_foreign_paths() {
        for raw in [
            "/other/plugin/waf",
            "/tollgate/widget/x",
            "/tollgate/rule/",
            "/tollgate/rule",
            "/tollgate/rule/a/b",
            "tollgate/rule/a",
        ] {
            assert!(ConfigPath::parse(raw).is_none(), "{raw} should not parse");
        }
    }

    #[test]
    fn prefixes() {
        assert_eq!(ConfigKind::Plugin.prefix(), "/tollgate/plugin/");
        assert_eq!(ConfigKind::Rule.prefix(), "/tollgate/rule/");
    }
}
