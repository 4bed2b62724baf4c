//! Generic RPC invocation.
//!
//! Tollgate does not speak any RPC wire protocol itself. Proxy plugins hand
//! an [`RpcRequest`] to an [`RpcInvoker`]; the bundled [`HttpRpcBridge`]
//! posts it as JSON to a sidecar that performs the actual call.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::http_client::{HttpClient, HttpClientError, UpstreamRequest};

/// Coordinates of one remote method, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcParams {
    pub interface_name: String,
    pub method: String,
    #[serde(default)]
    pub param_types: Vec<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// A fully addressed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Registry address the invoker should resolve providers from.
    pub registry: String,
    pub app_name: String,
    #[serde(flatten)]
    pub params: RpcParams,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc call timed out")]
    Timeout,

    #[error("rpc transport failure: {0}")]
    Transport(String),

    #[error("rpc provider returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("rpc result is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout)
    }
}

impl From<HttpClientError> for RpcError {
    fn from(e: HttpClientError) -> Self {
        match e {
            HttpClientError::Timeout => RpcError::Timeout,
            other => RpcError::Transport(other.to_string()),
        }
    }
}

/// Performs a remote call and returns its JSON result.
#[async_trait]
pub trait RpcInvoker: Send + Sync {
    async fn invoke(&self, request: RpcRequest) -> Result<Value, RpcError>;
}

/// [`RpcInvoker`] that forwards calls to an HTTP endpoint.
///
/// The request is POSTed as JSON. A 2xx response body is the call result
/// (an empty body is `null`); anything else is [`RpcError::Remote`].
pub struct HttpRpcBridge {
    client: HttpClient,
    endpoint: String,
}

impl HttpRpcBridge {
    pub fn new(client: HttpClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RpcInvoker for HttpRpcBridge {
    async fn invoke(&self, request: RpcRequest) -> Result<Value, RpcError> {
        let body = serde_json::to_vec(&request)?;
        let mut outbound = UpstreamRequest::new("POST", self.endpoint.clone())
            .with_header("content-type", "application/json")
            .with_body(Bytes::from(body));
        if let Some(timeout) = request.timeout {
            outbound = outbound.with_timeout(timeout);
        }

        let response = self.client.call(outbound).await?;
        if !response.is_success() {
            return Err(RpcError::Remote {
                status: response.status,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&response.body)?)
    }
}
