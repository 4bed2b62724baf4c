//! Compiled selector and rule sets with first-match resolution.
//!
//! A set is built once per configuration change and then only read. The
//! entries are stable-sorted by `sort`, so resolution is a single forward
//! scan and equal sorts keep their configured order.

use std::sync::Arc;

use tollgate_model::{RuleData, SelectorData, SelectorType};

use crate::condition::{matches, Condition};
use crate::view::RequestView;

/// A selector with compiled conditions.
#[derive(Debug)]
pub struct Selector {
    pub data: SelectorData,
    conditions: Vec<Condition>,
}

impl Selector {
    pub fn compile(data: SelectorData) -> Self {
        let conditions = data
            .conditions
            .iter()
            .cloned()
            .map(Condition::compile)
            .collect();
        Self { data, conditions }
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    /// Full-flow selectors match without evaluating conditions.
    pub fn matches<V: RequestView + ?Sized>(&self, view: &V) -> bool {
        if !self.data.enabled {
            return false;
        }
        match self.data.selector_type {
            SelectorType::FullFlow => true,
            SelectorType::CustomFlow => matches(
                &self.conditions,
                self.data.match_mode,
                SelectorType::CustomFlow,
                view,
            ),
        }
    }
}

/// A rule with compiled conditions.
#[derive(Debug)]
pub struct Rule {
    pub data: RuleData,
    conditions: Vec<Condition>,
}

impl Rule {
    pub fn compile(data: RuleData) -> Self {
        let conditions = data
            .conditions
            .iter()
            .cloned()
            .map(Condition::compile)
            .collect();
        Self { data, conditions }
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    /// `flow` is the owning selector's type: a rule without conditions only
    /// matches under a full-flow selector.
    pub fn matches<V: RequestView + ?Sized>(&self, flow: SelectorType, view: &V) -> bool {
        self.data.enabled && matches(&self.conditions, self.data.match_mode, flow, view)
    }
}

/// The selectors configured for one plugin, in resolution order.
#[derive(Debug, Default)]
pub struct SelectorSet {
    selectors: Vec<Arc<Selector>>,
}

impl SelectorSet {
    pub fn new(data: impl IntoIterator<Item = SelectorData>) -> Self {
        let mut selectors: Vec<Arc<Selector>> = data
            .into_iter()
            .map(|d| Arc::new(Selector::compile(d)))
            .collect();
        selectors.sort_by_key(|s| s.data.sort);
        Self { selectors }
    }

    /// First enabled selector matching the request.
    pub fn resolve<V: RequestView + ?Sized>(&self, view: &V) -> Option<Arc<Selector>> {
        self.selectors.iter().find(|s| s.matches(view)).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Selector>> {
        self.selectors.iter()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

/// The rules configured under one selector, in resolution order.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Arc<Rule>>,
}

impl RuleSet {
    pub fn new(data: impl IntoIterator<Item = RuleData>) -> Self {
        let mut rules: Vec<Arc<Rule>> = data
            .into_iter()
            .map(|d| Arc::new(Rule::compile(d)))
            .collect();
        rules.sort_by_key(|r| r.data.sort);
        Self { rules }
    }

    /// First enabled rule matching the request under a selector of type `flow`.
    pub fn resolve<V: RequestView + ?Sized>(
        &self,
        flow: SelectorType,
        view: &V,
    ) -> Option<Arc<Rule>> {
        self.rules.iter().find(|r| r.matches(flow, view)).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
