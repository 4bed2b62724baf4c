//! Gateway configuration file.
//!
//! Every field has a default, so an empty file is a valid configuration
//! that serves nothing until rules are published. Unknown fields are
//! rejected to catch typos early.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tollgate_resilience::CircuitBreakerConfig;
use tollgate_telemetry::{LogFormat, TelemetryConfig};
use tollgate_upstream::{HttpClientConfig, Upstream};

use crate::limits::RequestLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse gateway config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid gateway config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub listen: String,
    /// Include error details in gateway-generated responses.
    pub dev: bool,
    /// Whole-request deadline in milliseconds.
    pub request_timeout_ms: u64,
    pub logging: LoggingConfig,
    pub config_source: ConfigSource,
    pub http_client: HttpClientSettings,
    pub circuit_breaker: BreakerSettings,
    pub rate_limiter: RateLimiterSettings,
    pub discovery: DiscoverySettings,
    pub rpc: RpcSettings,
    pub limits: LimitSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9195".to_string(),
            dev: false,
            request_timeout_ms: 30_000,
            logging: LoggingConfig::default(),
            config_source: ConfigSource::default(),
            http_client: HttpClientSettings::default(),
            circuit_breaker: BreakerSettings::default(),
            rate_limiter: RateLimiterSettings::default(),
            discovery: DiscoverySettings::default(),
            rpc: RpcSettings::default(),
            limits: LimitSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Where plugin, selector and rule configuration comes from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigSource {
    /// Snapshot file; relative paths resolve against the config file.
    pub snapshot: Option<PathBuf>,
    /// Re-publish the snapshot when the file changes.
    pub watch: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpClientSettings {
    pub connect_timeout_ms: u64,
    pub default_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_ms: u64,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            default_timeout_ms: 30_000,
            pool_max_idle_per_host: 10,
            pool_idle_timeout_ms: 90_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            success_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimiterSettings {
    /// Longest a limiter check may take before the request is let through.
    pub check_timeout_ms: u64,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            check_timeout_ms: 500,
        }
    }
}

/// Static service table used by the springCloud plugin.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySettings {
    pub services: HashMap<String, Vec<Upstream>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcSettings {
    /// HTTP endpoint of the RPC bridge. The dubbo plugin is only registered
    /// when this is set.
    pub bridge_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitSettings {
    pub max_body_size: usize,
    pub max_headers: usize,
    pub max_header_size: usize,
    pub max_uri_length: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        let limits = RequestLimits::default();
        Self {
            max_body_size: limits.max_body_size,
            max_headers: limits.max_headers,
            max_header_size: limits.max_header_size,
            max_uri_length: limits.max_uri_length,
        }
    }
}

impl GatewayConfig {
    /// Read and validate a config file. Relative snapshot paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&source)?;
        if let (Some(snapshot), Some(dir)) = (&config.config_source.snapshot, path.parent()) {
            if snapshot.is_relative() {
                config.config_source.snapshot = Some(dir.join(snapshot));
            }
        }
        Ok(config)
    }

    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null.
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if LogFormat::parse(&self.logging.format).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown log format '{}', expected json or pretty",
                self.logging.format
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0
        {
            return Err(ConfigError::Invalid(
                "circuit breaker thresholds must be positive".to_string(),
            ));
        }
        for (service, instances) in &self.discovery.services {
            if instances.iter().any(|i| i.upstream_url.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "service '{service}' has an instance without upstreamUrl"
                )));
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid listen address: {}", self.listen)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig::new()
            .with_log_level(&self.logging.level)
            .with_log_format(LogFormat::parse(&self.logging.format).unwrap_or_default())
    }

    pub fn http_client(&self) -> HttpClientConfig {
        let settings = &self.http_client;
        HttpClientConfig {
            pool_max_idle_per_host: settings.pool_max_idle_per_host,
            pool_idle_timeout: Duration::from_millis(settings.pool_idle_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
        }
    }

    pub fn breaker_defaults(&self) -> CircuitBreakerConfig {
        let settings = &self.circuit_breaker;
        CircuitBreakerConfig {
            failure_threshold: settings.failure_threshold,
            failure_window: Duration::from_millis(settings.failure_window_ms),
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
            success_threshold: settings.success_threshold,
        }
    }

    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_body_size: self.limits.max_body_size,
            max_headers: self.limits.max_headers,
            max_header_size: self.limits.max_header_size,
            max_uri_length: self.limits.max_uri_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = GatewayConfig::from_yaml("").unwrap();
        assert_eq!(config.listen, "0.0.0.0:9195");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.breaker_defaults(), CircuitBreakerConfig::default());
        assert!(config.rpc.bridge_endpoint.is_none());
    }

    #[test]
    fn parses_nested_sections() {
        let config = GatewayConfig::from_yaml(
            r#"
listen: "127.0.0.1:8080"
logging:
  level: debug
  format: pretty
circuit_breaker:
  failure_threshold: 3
discovery:
  services:
    order-service:
      - upstreamUrl: "http://10.0.0.1:8080"
        weight: 10
rpc:
  bridge_endpoint: "http://127.0.0.1:20880/invoke"
"#,
        )
        .unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
        assert_eq!(config.telemetry().log_format, LogFormat::Pretty);
        assert_eq!(config.breaker_defaults().failure_threshold, 3);
        assert_eq!(config.breaker_defaults().success_threshold, 1);
        assert_eq!(config.discovery.services["order-service"][0].weight, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = GatewayConfig::from_yaml("listne: 0.0.0.0:1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn bad_listen_address_is_invalid() {
        let err = GatewayConfig::from_yaml("listen: nowhere").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_threshold_is_invalid() {
        let err = GatewayConfig::from_yaml("circuit_breaker: {failure_threshold: 0}").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn relative_snapshot_resolves_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "config_source:\n  snapshot: rules.yaml\n  watch: true").unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(
            config.config_source.snapshot,
            Some(dir.path().join("rules.yaml"))
        );
        assert!(config.config_source.watch);
    }
}
