use std::time::Duration;

use thiserror::Error;
use tollgate_model::result::messages;
use tollgate_model::ResultEnvelope;

/// Failure raised by a plugin.
///
/// Configuration errors are normally logged and swallowed by the plugin
/// itself (fail open); any error that escapes to the chain ends it.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("plugin {plugin} wrote a second response")]
    ResponseAlreadyWritten { plugin: String },
}

impl PluginError {
    /// HTTP status for the client-visible response.
    pub fn status(&self) -> u16 {
        match self {
            PluginError::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Envelope written when this error ends the chain.
    pub fn envelope(&self) -> ResultEnvelope {
        match self {
            PluginError::Timeout(_) => ResultEnvelope::error(504, messages::GATEWAY_TIMEOUT),
            PluginError::Upstream(_) => ResultEnvelope::error(500, messages::UPSTREAM_ERROR),
            _ => ResultEnvelope::error(500, messages::INTERNAL_ERROR),
        }
    }
}
