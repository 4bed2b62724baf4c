//! The normalized view of an inbound request.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Backend protocol a request is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcType {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "dubbo")]
    Dubbo,
    #[serde(rename = "springCloud")]
    SpringCloud,
}

impl RpcType {
    /// Parse from the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "dubbo" => Some(Self::Dubbo),
            "springCloud" => Some(Self::SpringCloud),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcType::Http => "http",
            RpcType::Dubbo => "dubbo",
            RpcType::SpringCloud => "springCloud",
        }
    }
}

/// Everything the dispatch engine knows about a request.
///
/// Built once by the HTTP layer and never mutated by plugins; derived
/// state goes into the exchange's attribute bag instead.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Logical module (service) the caller addresses.
    pub module: String,
    /// Logical method within the module.
    pub method: String,
    pub rpc_type: RpcType,
    /// Method to use towards an HTTP backend.
    pub http_method: Option<String>,
    /// Request path, without query.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query_string: Option<String>,
    pub query: HashMap<String, String>,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Parameters decoded from a JSON-object or form body.
    pub post_params: HashMap<String, String>,
    pub host: Option<String>,
    pub remote_ip: Option<String>,
    /// Free-form JSON forwarded to service-discovery backends.
    pub ext_info: Option<String>,
    pub body: Bytes,
}

impl RequestDescriptor {
    pub fn new(module: impl Into<String>, method: impl Into<String>, rpc_type: RpcType) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            rpc_type,
            http_method: None,
            path: "/".to_string(),
            query_string: None,
            query: HashMap::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            post_params: HashMap::new(),
            host: None,
            remote_ip: None,
            ext_info: None,
            body: Bytes::new(),
        }
    }

    pub fn with_http_method(mut self, method: impl Into<String>) -> Self {
        self.http_method = Some(method.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_post_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.post_params.insert(name.into(), value.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_remote_ip(mut self, ip: impl Into<String>) -> Self {
        self.remote_ip = Some(ip.into());
        self
    }

    pub fn with_ext_info(mut self, ext_info: impl Into<String>) -> Self {
        self.ext_info = Some(ext_info.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Path plus query string.
    pub fn uri(&self) -> String {
        match &self.query_string {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }

    /// Host without its port. Bracketed IPv6 literals keep their brackets.
    pub fn domain(&self) -> Option<&str> {
        self.host.as_deref().map(strip_port)
    }

    /// Named descriptor field, as exposed to `post` conditions.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "module" => Some(&self.module),
            "method" => Some(&self.method),
            "rpcType" => Some(self.rpc_type.as_str()),
            "httpMethod" => self.http_method.as_deref(),
            "extInfo" => self.ext_info.as_deref(),
            _ => None,
        }
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name,
        _ => host,
    }
}
