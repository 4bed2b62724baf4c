//! Compiled conditions and the match-mode combinator.

use regex_lite::Regex;
use tollgate_model::{ConditionData, MatchMode, Operator, SelectorType};

use crate::view::RequestView;

/// A condition ready for evaluation.
///
/// Regex patterns and numeric operands are prepared once when the
/// condition is loaded. A pattern that fails to compile or an operand that
/// is not a number makes the condition never match.
#[derive(Debug, Clone)]
pub struct Condition {
    data: ConditionData,
    operand: Operand,
}

#[derive(Debug, Clone)]
enum Operand {
    Text,
    Pattern(Regex),
    Number(f64),
    Invalid,
}

impl Condition {
    pub fn compile(data: ConditionData) -> Self {
        let operand = match data.operator {
            Operator::Eq | Operator::Like => Operand::Text,
            Operator::Match => match Regex::new(&data.param_value) {
                Ok(regex) => Operand::Pattern(regex),
                Err(e) => {
                    tracing::warn!(
                        pattern = %data.param_value,
                        error = %e,
                        "invalid condition pattern, condition will never match"
                    );
                    Operand::Invalid
                }
            },
            Operator::Gt | Operator::Lt => match data.param_value.trim().parse::<f64>() {
                Ok(n) => Operand::Number(n),
                Err(_) => {
                    tracing::warn!(
                        value = %data.param_value,
                        "non-numeric operand for numeric comparison, condition will never match"
                    );
                    Operand::Invalid
                }
            },
        };
        Self { data, operand }
    }

    pub fn data(&self) -> &ConditionData {
        &self.data
    }

    /// Evaluate against a request. A missing attribute fails the condition.
    pub fn evaluate<V: RequestView + ?Sized>(&self, view: &V) -> bool {
        let Some(live) = view.lookup(self.data.param_type, &self.data.param_name) else {
            return false;
        };
        let live = live.as_ref();
        match (&self.data.operator, &self.operand) {
            (Operator::Eq, _) => live == self.data.param_value,
            (Operator::Like, _) => live.contains(self.data.param_value.as_str()),
            (Operator::Match, Operand::Pattern(regex)) => regex.is_match(live),
            (Operator::Gt, Operand::Number(bound)) => {
                parse_number(live).is_some_and(|n| n > *bound)
            }
            (Operator::Lt, Operand::Number(bound)) => {
                parse_number(live).is_some_and(|n| n < *bound)
            }
            _ => false,
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Combine `conditions` under `mode`.
///
/// An empty list matches only under `SelectorType::FullFlow`; a custom-flow
/// entry without conditions never matches.
pub fn matches<V: RequestView + ?Sized>(
    conditions: &[Condition],
    mode: MatchMode,
    flow: SelectorType,
    view: &V,
) -> bool {
    if conditions.is_empty() {
        return flow == SelectorType::FullFlow;
    }
    match mode {
        MatchMode::And => conditions.iter().all(|c| c.evaluate(view)),
        MatchMode::Or => conditions.iter().any(|c| c.evaluate(view)),
    }
}
