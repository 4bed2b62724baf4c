//! Conditions: a single comparison over one request attribute.

use serde::{Deserialize, Serialize};

/// Where a condition reads its live value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// A descriptor field (`module`, `method`, `rpcType`, ...) or a body parameter.
    Post,
    /// A query string parameter.
    Query,
    /// A request header (case-insensitive name).
    Header,
    /// A cookie.
    Cookie,
    /// The `Host` header, port included.
    Host,
    /// The client address.
    Ip,
    /// Path plus query string.
    Uri,
    /// The request path only.
    Path,
    /// The host without its port.
    Domain,
}

/// Comparison applied between the live value and the configured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=", alias = "eq")]
    Eq,
    /// Regular expression search.
    #[serde(rename = "match", alias = "regex")]
    Match,
    /// Substring containment.
    #[serde(rename = "like")]
    Like,
    /// Numeric greater-than.
    #[serde(rename = ">", alias = "gt")]
    Gt,
    /// Numeric less-than.
    #[serde(rename = "<", alias = "lt")]
    Lt,
}

/// A condition as configured. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionData {
    pub param_type: ParamType,
    pub operator: Operator,
    #[serde(default)]
    pub param_name: String,
    pub param_value: String,
}

impl ConditionData {
    pub fn new(
        param_type: ParamType,
        param_name: impl Into<String>,
        operator: Operator,
        param_value: impl Into<String>,
    ) -> Self {
        Self {
            param_type,
            operator,
            param_name: param_name.into(),
            param_value: param_value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_accepts_symbols_and_aliases() {
        let ops: Vec<Operator> =
            serde_json::from_str(r#"["=", "eq", "match", "regex", "like", ">", "lt"]"#).unwrap();
        assert_eq!(
            ops,
            vec![
                Operator::Eq,
                Operator::Eq,
                Operator::Match,
                Operator::Match,
                Operator::Like,
                Operator::Gt,
                Operator::Lt,
            ]
        );
    }

    #[test]
    fn condition_deserializes_camel_case() {
        let json = r#"{"paramType":"post","operator":"=","paramName":"module","paramValue":"pdm"}"#;
        let condition: ConditionData = serde_json::from_str(json).unwrap();
        assert_eq!(
            condition,
            ConditionData::new(ParamType::Post, "module", Operator::Eq, "pdm")
        );
    }
}
