//! Typed attributes plugins exchange through the bag.

pub use tollgate_upstream::{RpcParams, UpstreamResponse};

/// Target path written by the rewrite plugin for proxy plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteUri(pub String);

/// Classification of the proxied call, read by the monitor plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Success,
    /// The upstream answered with a non-2xx status, or the call failed.
    Error,
    Timeout,
    /// The circuit breaker refused the call.
    ShortCircuited,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Success => "success",
            ResultType::Error => "error",
            ResultType::Timeout => "timeout",
            ResultType::ShortCircuited => "short_circuited",
        }
    }
}

/// Name of the proxy plugin that produced the [`ResultType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledBy(pub &'static str);
