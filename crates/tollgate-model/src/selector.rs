//! Selectors: top-level routing predicates grouping rules under one plugin.

use serde::{Deserialize, Serialize};

use crate::condition::ConditionData;

/// How a condition list combines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    And,
    Or,
}

/// Whether a selector evaluates its conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorType {
    /// Matches every request for the plugin; conditions are ignored.
    #[serde(alias = "full")]
    FullFlow,
    /// Matches according to its conditions.
    #[default]
    #[serde(alias = "custom")]
    CustomFlow,
}

/// A selector as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorData {
    pub id: String,
    pub plugin_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default, rename = "type")]
    pub selector_type: SelectorType,
    #[serde(default)]
    pub sort: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub logged: bool,
    #[serde(default = "default_true")]
    pub continued: bool,
    #[serde(default)]
    pub conditions: Vec<ConditionData>,
}

fn default_true() -> bool {
    true
}

impl SelectorData {
    /// An enabled custom-flow selector with no conditions.
    pub fn new(id: impl Into<String>, plugin_id: impl Into<String>, sort: i32) -> Self {
        Self {
            id: id.into(),
            plugin_id: plugin_id.into(),
            name: String::new(),
            match_mode: MatchMode::And,
            selector_type: SelectorType::CustomFlow,
            sort,
            enabled: true,
            logged: false,
            continued: true,
            conditions: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, selector_type: SelectorType) -> Self {
        self.selector_type = selector_type;
        self
    }

    pub fn with_match_mode(mut self, match_mode: MatchMode) -> Self {
        self.match_mode = match_mode;
        self
    }

    pub fn with_condition(mut self, condition: ConditionData) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_continued(mut self, continued: bool) -> Self {
        self.continued = continued;
        self
    }
}
