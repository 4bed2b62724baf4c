//! Request size limits, checked before a request reaches the chain.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("URI too long: {length} characters exceeds limit of {limit}")]
    UriTooLong { length: usize, limit: usize },

    #[error("too many headers: {count} exceeds limit of {limit}")]
    TooManyHeaders { count: usize, limit: usize },

    #[error("header '{name}' too large: {size} bytes exceeds limit of {limit}")]
    HeaderTooLarge {
        name: String,
        size: usize,
        limit: usize,
    },

    #[error("body too large: {size} bytes exceeds limit of {limit}")]
    BodyTooLarge { size: usize, limit: usize },
}

impl LimitError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            LimitError::UriTooLong { .. } => "uri_too_long",
            LimitError::TooManyHeaders { .. } => "too_many_headers",
            LimitError::HeaderTooLarge { .. } => "header_too_large",
            LimitError::BodyTooLarge { .. } => "body_too_large",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Maximum request body size in bytes (default: 1MB).
    pub max_body_size: usize,
    /// Maximum number of headers (default: 100).
    pub max_headers: usize,
    /// Maximum size of one header, name plus value (default: 8KB).
    pub max_header_size: usize,
    /// Maximum URI length in characters (default: 8KB).
    pub max_uri_length: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            max_headers: 100,
            max_header_size: 8 * 1024,
            max_uri_length: 8 * 1024,
        }
    }
}

impl RequestLimits {
    pub fn validate_uri(&self, uri: &str) -> Result<(), LimitError> {
        if uri.len() > self.max_uri_length {
            return Err(LimitError::UriTooLong {
                length: uri.len(),
                limit: self.max_uri_length,
            });
        }
        Ok(())
    }

    pub fn validate_headers(&self, headers: &HashMap<String, String>) -> Result<(), LimitError> {
        if headers.len() > self.max_headers {
            return Err(LimitError::TooManyHeaders {
                count: headers.len(),
                limit: self.max_headers,
            });
        }
        for (name, value) in headers {
            let size = name.len() + value.len();
            if size > self.max_header_size {
                return Err(LimitError::HeaderTooLarge {
                    name: name.clone(),
                    size,
                    limit: self.max_header_size,
                });
            }
        }
        Ok(())
    }

    pub fn validate_body_size(&self, body_len: usize) -> Result<(), LimitError> {
        if body_len > self.max_body_size {
            return Err(LimitError::BodyTooLarge {
                size: body_len,
                limit: self.max_body_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_within_limit() {
        let limits = RequestLimits::default();
        assert!(limits.validate_uri("/orders/list?page=1").is_ok());
    }

    #[test]
    fn uri_too_long() {
        let limits = RequestLimits {
            max_uri_length: 10,
            ..Default::default()
        };
        let err = limits.validate_uri("/orders/list/123").unwrap_err();
        assert!(matches!(err, LimitError::UriTooLong { length: 16, limit: 10 }));
        assert_eq!(err.reason(), "uri_too_long");
    }

    #[test]
    fn too_many_headers() {
        let limits = RequestLimits {
            max_headers: 5,
            ..Default::default()
        };
        let headers: HashMap<String, String> = (0..10)
            .map(|i| (format!("x-header-{i}"), "value".to_string()))
            .collect();
        assert!(matches!(
            limits.validate_headers(&headers),
            Err(LimitError::TooManyHeaders { count: 10, limit: 5 })
        ));
    }

    #[test]
    fn header_too_large() {
        let limits = RequestLimits {
            max_header_size: 16,
            ..Default::default()
        };
        let mut headers = HashMap::new();
        headers.insert("extinfo".to_string(), "x".repeat(32));
        let err = limits.validate_headers(&headers).unwrap_err();
        assert!(matches!(err, LimitError::HeaderTooLarge { .. }));
    }

    #[test]
    fn body_size_boundary() {
        let limits = RequestLimits {
            max_body_size: 100,
            ..Default::default()
        };
        assert!(limits.validate_body_size(100).is_ok());
        assert!(limits.validate_body_size(101).is_err());
    }
}
