//! Service discovery.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::load_balance::Upstream;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("service {0} has no available instances")]
    NoInstances(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a logical service id to its live instances.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Instances of `service_id`. Never returns an empty list on success.
    async fn instances(&self, service_id: &str) -> Result<Vec<Upstream>, DiscoveryError>;
}

/// A registry backed by a fixed table from the gateway config.
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    services: HashMap<String, Vec<Upstream>>,
}

impl StaticRegistry {
    pub fn new(services: HashMap<String, Vec<Upstream>>) -> Self {
        Self { services }
    }

    pub fn with_service(mut self, service_id: impl Into<String>, instances: Vec<Upstream>) -> Self {
        self.services.insert(service_id.into(), instances);
        self
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn instances(&self, service_id: &str) -> Result<Vec<Upstream>, DiscoveryError> {
        let instances = self
            .services
            .get(service_id)
            .ok_or_else(|| DiscoveryError::UnknownService(service_id.to_string()))?;
        if instances.is_empty() {
            return Err(DiscoveryError::NoInstances(service_id.to_string()));
        }
        Ok(instances.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_lookup() {
        let registry = StaticRegistry::default()
            .with_service("orders", vec![Upstream::new("http://10.0.0.1:8080", 50)])
            .with_service("drained", Vec::new());

        let found = registry.instances("orders").await.unwrap();
        assert_eq!(found[0].upstream_url, "http://10.0.0.1:8080");

        assert!(matches!(
            registry.instances("missing").await,
            Err(DiscoveryError::UnknownService(_))
        ));
        assert!(matches!(
            registry.instances("drained").await,
            Err(DiscoveryError::NoInstances(_))
        ));
    }
}
