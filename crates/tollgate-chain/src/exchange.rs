//! Per-request state carried through the chain.

use std::time::Duration;

use bytes::Bytes;
use http::Extensions;
use tollgate_model::{RequestDescriptor, ResultEnvelope};
use tollgate_upstream::UpstreamResponse;
use uuid::Uuid;

use crate::error::PluginError;

/// A response ready to be written to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    /// An envelope body with the given HTTP status.
    pub fn envelope(status: u16, envelope: &ResultEnvelope) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(envelope.to_json()),
        }
    }

    /// Envelope whose code equals the HTTP status.
    pub fn error(status: u16, message: &str) -> Self {
        Self::envelope(status, &ResultEnvelope::error(i32::from(status), message))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl From<UpstreamResponse> for Response {
    fn from(upstream: UpstreamResponse) -> Self {
        Self {
            status: upstream.status,
            headers: upstream.headers,
            body: upstream.body,
        }
    }
}

/// Execution bookkeeping, reset at the start of every chain run.
#[derive(Debug, Default)]
pub(crate) struct Trace {
    /// The continuation past the last plugin was invoked.
    pub(crate) completed: bool,
    pub(crate) short_circuited_by: Option<String>,
    pub(crate) failed_at: Option<String>,
    /// Wall time of the most recently finished step, including everything
    /// it continued into.
    pub(crate) downstream: Duration,
}

/// One request travelling through the chain.
///
/// The attribute bag is the only channel between plugins and lives exactly
/// as long as the exchange. At most one response may be written.
pub struct Exchange {
    request: RequestDescriptor,
    request_id: Uuid,
    attributes: Extensions,
    response: Option<Response>,
    pub(crate) trace: Trace,
}

impl Exchange {
    pub fn new(request: RequestDescriptor) -> Self {
        Self {
            request,
            request_id: Uuid::new_v4(),
            attributes: Extensions::new(),
            response: None,
            trace: Trace::default(),
        }
    }

    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.request.remote_ip.as_deref()
    }

    /// Store a typed attribute, returning the previous value of that type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.attributes.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.attributes.remove::<T>()
    }

    /// Write the client response. Fails if one was already written.
    pub fn respond(&mut self, plugin: &str, response: Response) -> Result<(), PluginError> {
        if self.response.is_some() {
            return Err(PluginError::ResponseAlreadyWritten {
                plugin: plugin.to_string(),
            });
        }
        self.response = Some(response);
        Ok(())
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Replace whatever was written; used only by the chain on failure.
    pub(crate) fn force_response(&mut self, response: Response) {
        self.response = Some(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_model::RpcType;

    #[derive(Debug, Clone, PartialEq)]
    struct Marker(u32);

    fn exchange() -> Exchange {
        Exchange::new(RequestDescriptor::new("orders", "list", RpcType::Http).with_remote_ip("10.0.0.9"))
    }

    #[test]
    fn attributes_are_typed() {
        let mut ex = exchange();
        assert!(ex.get::<Marker>().is_none());
        ex.insert(Marker(1));
        assert_eq!(ex.insert(Marker(2)), Some(Marker(1)));
        assert_eq!(ex.get::<Marker>(), Some(&Marker(2)));
        assert_eq!(ex.remove::<Marker>(), Some(Marker(2)));
        assert_eq!(ex.client_ip(), Some("10.0.0.9"));
    }

    #[test]
    fn second_response_is_rejected() {
        let mut ex = exchange();
        ex.respond("waf", Response::error(403, "rejected")).unwrap();
        let err = ex
            .respond("response", Response::error(502, "late"))
            .unwrap_err();
        assert!(matches!(err, PluginError::ResponseAlreadyWritten { .. }));
        assert_eq!(ex.response().unwrap().status, 403);
    }

    #[test]
    fn error_response_is_an_envelope() {
        let response = Response::error(429, "too many requests");
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["code"], 429);
        assert_eq!(body["message"], "too many requests");
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(exchange().request_id(), exchange().request_id());
    }
}
