//! Builds and validates the [`RequestDescriptor`] for an inbound request.
//!
//! Callers address a logical `module` and `method` and name the backend
//! protocol with `rpcType`. These fields are read from headers first, then
//! the query string, then the decoded body parameters.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use hyper::http::request::Parts;
use serde_json::Value;
use thiserror::Error;
use tollgate_chain::RpcParams;
use tollgate_model::{RequestDescriptor, RpcType};

const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("module is required")]
    MissingModule,

    #[error("method is required")]
    MissingMethod,

    #[error("rpcType is required")]
    MissingRpcType,

    #[error("unknown rpcType '{0}'")]
    UnknownRpcType(String),

    #[error("unsupported httpMethod '{0}'")]
    UnsupportedHttpMethod(String),

    #[error("dubboParams is required for dubbo requests")]
    MissingRpcParams,

    #[error("invalid dubboParams: {0}")]
    InvalidRpcParams(String),
}

impl DescriptorError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DescriptorError::MissingModule => "missing_module",
            DescriptorError::MissingMethod => "missing_method",
            DescriptorError::MissingRpcType => "missing_rpc_type",
            DescriptorError::UnknownRpcType(_) => "unknown_rpc_type",
            DescriptorError::UnsupportedHttpMethod(_) => "unsupported_http_method",
            DescriptorError::MissingRpcParams => "missing_rpc_params",
            DescriptorError::InvalidRpcParams(_) => "invalid_rpc_params",
        }
    }
}

/// A validated request, plus the RPC coordinates of a dubbo call.
#[derive(Debug)]
pub struct Extracted {
    pub descriptor: RequestDescriptor,
    pub rpc_params: Option<RpcParams>,
}

/// Header names, lowercased. Repeated headers are joined in arrival order,
/// cookies with `; ` and everything else with `, `.
pub fn header_map(parts: &Parts) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::with_capacity(parts.headers.keys_len());
    for (name, value) in &parts.headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        match headers.get_mut(name.as_str()) {
            Some(existing) => {
                existing.push_str(if name == hyper::header::COOKIE { "; " } else { ", " });
                existing.push_str(value);
            }
            None => {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
    }
    headers
}

pub fn extract(
    parts: &Parts,
    headers: HashMap<String, String>,
    body: Bytes,
    remote: Option<SocketAddr>,
) -> Result<Extracted, DescriptorError> {
    let query_string = parts.uri.query().map(str::to_string);
    let query: HashMap<String, String> = query_string
        .as_deref()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let post_params = parse_post_params(headers.get("content-type").map(String::as_str), &body);

    let field = |name: &str| -> Option<String> {
        headers
            .get(&name.to_ascii_lowercase())
            .or_else(|| query.get(name))
            .or_else(|| post_params.get(name))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let module = field("module").ok_or(DescriptorError::MissingModule)?;
    let method = field("method").ok_or(DescriptorError::MissingMethod)?;
    let rpc_type = match field("rpcType") {
        Some(raw) => RpcType::parse(&raw).ok_or(DescriptorError::UnknownRpcType(raw))?,
        None => return Err(DescriptorError::MissingRpcType),
    };

    let mut rpc_params = None;
    let mut http_method = None;
    if rpc_type == RpcType::Dubbo {
        let raw = field("dubboParams").ok_or(DescriptorError::MissingRpcParams)?;
        rpc_params = Some(parse_rpc_params(&raw)?);
    } else {
        let raw = field("httpMethod").unwrap_or_else(|| parts.method.as_str().to_string());
        let upper = raw.to_ascii_uppercase();
        if !HTTP_METHODS.contains(&upper.as_str()) {
            return Err(DescriptorError::UnsupportedHttpMethod(raw));
        }
        http_method = Some(upper);
    }

    let ext_info = field("extInfo");
    let host = headers
        .get("host")
        .cloned()
        .or_else(|| parts.uri.authority().map(|a| a.to_string()));
    let remote_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| remote.map(|addr| addr.ip().to_string()));
    let cookies = headers
        .get("cookie")
        .map(String::as_str)
        .map(parse_cookies)
        .unwrap_or_default();

    let descriptor = RequestDescriptor {
        module,
        method,
        rpc_type,
        http_method,
        path: parts.uri.path().to_string(),
        query_string,
        query,
        headers,
        cookies,
        post_params,
        host,
        remote_ip,
        ext_info,
        body,
    };
    Ok(Extracted {
        descriptor,
        rpc_params,
    })
}

fn parse_rpc_params(raw: &str) -> Result<RpcParams, DescriptorError> {
    let params: RpcParams = serde_json::from_str(raw)
        .map_err(|e| DescriptorError::InvalidRpcParams(e.to_string()))?;
    if params.interface_name.trim().is_empty() || params.method.trim().is_empty() {
        return Err(DescriptorError::InvalidRpcParams(
            "interfaceName and method must not be blank".to_string(),
        ));
    }
    Ok(params)
}

/// Parameters from a form-encoded or JSON-object body. Non-string JSON
/// values are kept as their JSON text.
fn parse_post_params(content_type: Option<&str>, body: &[u8]) -> HashMap<String, String> {
    if body.is_empty() {
        return HashMap::new();
    }
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return form_urlencoded::parse(body).into_owned().collect();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        _ => HashMap::new(),
    }
}

fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
