//! The uniform envelope for gateway-generated responses.

use serde::{Deserialize, Serialize};

/// Fixed messages for chain-generated responses.
pub mod messages {
    pub const REJECTED: &str = "rejected";
    pub const TOO_MANY_REQUESTS: &str = "too many requests";
    pub const GATEWAY_TIMEOUT: &str = "gateway timeout";
    pub const UPSTREAM_ERROR: &str = "upstream service error";
    pub const NO_UPSTREAM: &str = "no upstream handled the request";
    pub const INTERNAL_ERROR: &str = "internal gateway error";
    pub const BAD_REQUEST: &str =
        "request parameters are invalid, please check the documentation";
}

/// `{code, message, data}` body written for deny, limit, timeout and
/// failure responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ResultEnvelope {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"message":"","data":null}}"#, self.code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_shape() {
        let body = ResultEnvelope::error(403, messages::REJECTED).to_json();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["code"], 403);
        assert_eq!(value["message"], "rejected");
        assert!(value["data"].is_null());
    }

    #[test]
    fn success_envelope_carries_data() {
        let envelope = ResultEnvelope::success(serde_json::json!({"id": 7}));
        assert_eq!(envelope.code, 200);
        assert_eq!(envelope.data["id"], 7);
    }
}
