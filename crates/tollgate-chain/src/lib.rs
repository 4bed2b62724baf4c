//! Plugin pipeline for the Tollgate dispatch engine.
//!
//! A [`PluginChain`] runs an ordered list of [`Plugin`]s against one
//! [`Exchange`]. Each plugin either continues through its [`Next`]
//! continuation or ends the chain by writing a response. Plugins that are
//! configured through selectors and rules implement [`RulePlugin`] and are
//! registered through the [`RuleDriven`] adapter.

pub mod attributes;
pub mod chain;
pub mod error;
pub mod exchange;
pub mod proxy;
pub mod rule;

pub use attributes::{HandledBy, ResultType, RewriteUri, RpcParams, UpstreamResponse};
pub use chain::{ChainObserver, ChainOutcome, Next, NoopObserver, Plugin, PluginChain};
pub use error::PluginError;
pub use exchange::{Exchange, Response};
pub use rule::{Matched, RuleDriven, RulePlugin};
