//! Rules: fine-grained predicates carrying plugin-specific configuration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::condition::ConditionData;
use crate::selector::MatchMode;

/// Failure to decode a rule's handle into a plugin's configuration type.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The rule carries no handle at all.
    #[error("rule {rule} has no handle")]
    Missing { rule: String },

    /// The handle does not fit the plugin's schema.
    #[error("rule {rule} has a malformed handle: {source}")]
    Malformed {
        rule: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A rule as configured.
///
/// `handle` is opaque to everything except the owning plugin. It may be
/// stored either as a JSON object or as a JSON-encoded string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleData {
    pub id: String,
    pub selector_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub logged: bool,
    #[serde(default)]
    pub sort: i32,
    #[serde(default)]
    pub conditions: Vec<ConditionData>,
    #[serde(default)]
    pub handle: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

impl RuleData {
    /// An enabled rule with no conditions and no handle.
    pub fn new(id: impl Into<String>, selector_id: impl Into<String>, sort: i32) -> Self {
        Self {
            id: id.into(),
            selector_id: selector_id.into(),
            name: String::new(),
            match_mode: MatchMode::And,
            enabled: true,
            logged: false,
            sort,
            conditions: Vec::new(),
            handle: serde_json::Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
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

    pub fn with_handle(mut self, handle: serde_json::Value) -> Self {
        self.handle = handle;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Decode the handle into the owning plugin's configuration type.
    pub fn decode_handle<T: DeserializeOwned>(&self) -> Result<T, HandleError> {
        let malformed = |source| HandleError::Malformed {
            rule: self.id.clone(),
            source,
        };
        match &self.handle {
            serde_json::Value::Null => Err(HandleError::Missing {
                rule: self.id.clone(),
            }),
            serde_json::Value::String(s) if s.trim().is_empty() => Err(HandleError::Missing {
                rule: self.id.clone(),
            }),
            serde_json::Value::String(s) => serde_json::from_str(s).map_err(malformed),
            value => T::deserialize(value).map_err(malformed),
        }
    }
}
