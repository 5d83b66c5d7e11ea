//! Domain registry lookups
//!
//! The orchestrator does not own domain ownership or verification; it asks
//! a [`DomainRegistry`] for both. [`StaticDomainRegistry`] is seeded from
//! the `domains` configuration block.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, trace};

use certward_common::{DomainId, StoreId, VerificationStatus};
use certward_config::Config;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("domain registry unavailable: {0}")]
    Unavailable(String),
}

/// A registered domain as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub id: DomainId,
    /// Registered name (`shop.example.com`)
    pub name: String,
    /// Name the certificate covers (`checkout.shop.example.com`)
    pub full_name: String,
    pub verification_status: VerificationStatus,
    pub store_id: Option<StoreId>,
}

impl Domain {
    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }
}

/// Source of domain records
#[async_trait]
pub trait DomainRegistry: Send + Sync {
    async fn get_domain(&self, id: &DomainId) -> Result<Option<Domain>, RegistryError>;
}

/// In-process registry backed by a concurrent map
#[derive(Debug, Clone, Default)]
pub struct StaticDomainRegistry {
    domains: Arc<DashMap<DomainId, Domain>>,
}

impl StaticDomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the `domains` block, applying the configured host prefix
    pub fn from_config(config: &Config) -> Self {
        let registry = Self::new();
        for entry in &config.domains {
            registry.insert(Domain {
                id: DomainId::new(entry.id.clone()),
                name: entry.name.clone(),
                full_name: config.acme.certificate_name(&entry.name),
                verification_status: entry.status,
                store_id: entry.store.clone().map(StoreId::new),
            });
        }
        debug!(domains = registry.len(), "Seeded domain registry");
        registry
    }

    pub fn insert(&self, domain: Domain) {
        self.domains.insert(domain.id.clone(), domain);
    }

    pub fn remove(&self, id: &DomainId) -> Option<Domain> {
        self.domains.remove(id).map(|(_, domain)| domain)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[async_trait]
impl DomainRegistry for StaticDomainRegistry {
    async fn get_domain(&self, id: &DomainId) -> Result<Option<Domain>, RegistryError> {
        trace!(domain_id = %id, "Registry lookup");
        Ok(self.domains.get(id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certward_config::DomainEntry;

    #[tokio::test]
    async fn test_from_config_applies_host_prefix() {
        let mut config = Config::default();
        config.domains.push(DomainEntry {
            id: "dom-1".to_string(),
            name: "shop.example.com".to_string(),
            status: VerificationStatus::Verified,
            store: Some("store-9".to_string()),
        });

        let registry = StaticDomainRegistry::from_config(&config);
        let domain = registry
            .get_domain(&DomainId::from("dom-1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(domain.full_name, "checkout.shop.example.com");
        assert_eq!(domain.store_id, Some(StoreId::new("store-9")));
        assert!(domain.is_verified());
    }

    #[tokio::test]
    async fn test_unknown_domain() {
        let registry = StaticDomainRegistry::new();
        assert!(registry
            .get_domain(&DomainId::from("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = StaticDomainRegistry::new();
        registry.insert(Domain {
            id: DomainId::from("d"),
            name: "d.example.com".to_string(),
            full_name: "d.example.com".to_string(),
            verification_status: VerificationStatus::Unverified,
            store_id: None,
        });
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&DomainId::from("d")).is_some());
        assert!(registry.is_empty());
    }
}
