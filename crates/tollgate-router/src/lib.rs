//! Selector and rule matching.
//!
//! Compiles configured selectors and rules into sorted, immutable sets
//! whose conditions are ready to evaluate (regexes compiled, numeric
//! operands parsed), and resolves the first applicable entry for a
//! request. Everything here is pure: no I/O, no shared state.

pub mod condition;
pub mod resolve;
pub mod view;

pub use condition::{matches, Condition};
pub use resolve::{Rule, RuleSet, Selector, SelectorSet};
pub use view::RequestView;
