//! Data model shared by every Tollgate crate.
//!
//! The types here describe what operators configure (plugins, selectors,
//! rules, conditions), what the gateway knows about an inbound request,
//! and the envelope every gateway-generated response is wrapped in.
//! Nothing in this crate performs I/O or matching.

pub mod condition;
pub mod plugin;
pub mod request;
pub mod result;
pub mod rule;
pub mod selector;

pub use condition::{ConditionData, Operator, ParamType};
pub use plugin::{BuiltinPlugin, PluginData, PluginRole};
pub use request::{RequestDescriptor, RpcType};
pub use result::ResultEnvelope;
pub use rule::{HandleError, RuleData};
pub use selector::{MatchMode, SelectorData, SelectorType};
