//! In-memory certificate store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use certward_common::{CertificateId, CertificateProvider};

use super::model::{Certificate, CertificateMaterial, CertificateRevision, RenewalLog};
use super::state::{latest_logs, StoreState};
use super::{CertificateStore, StoreError};

/// Store kept entirely in memory; lost on restart
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    state: RwLock<StoreState>,
    logs: RwLock<Vec<RenewalLog>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn upsert_active(
        &self,
        domain_name: &str,
        material: CertificateMaterial,
        provider: CertificateProvider,
        expires_at: DateTime<Utc>,
    ) -> Result<Certificate, StoreError> {
        Ok(self
            .state
            .write()
            .upsert_active(domain_name, material, provider, expires_at, Utc::now()))
    }

    async fn find_active(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(self.state.read().find_active(domain_name))
    }

    async fn find_by_domain(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(self.state.read().find_by_domain(domain_name))
    }

    async fn get(&self, id: &CertificateId) -> Result<Option<Certificate>, StoreError> {
        Ok(self.state.read().get(id))
    }

    async fn find_expiring_before(
        &self,
        threshold: DateTime<Utc>,
        auto_renew_only: bool,
    ) -> Result<Vec<Certificate>, StoreError> {
        Ok(self
            .state
            .read()
            .find_expiring_before(threshold, auto_renew_only))
    }

    async fn record_renewal_attempt(
        &self,
        id: &CertificateId,
        success: bool,
        error: Option<&str>,
    ) -> Result<Certificate, StoreError> {
        self.state
            .write()
            .record_renewal_attempt(id, success, error, Utc::now())
    }

    async fn record_failure(
        &self,
        domain_name: &str,
        error: &str,
    ) -> Result<Certificate, StoreError> {
        Ok(self
            .state
            .write()
            .record_failure(domain_name, error, Utc::now()))
    }

    async fn set_auto_renew(
        &self,
        id: &CertificateId,
        enabled: bool,
    ) -> Result<Certificate, StoreError> {
        self.state.write().set_auto_renew(id, enabled)
    }

    async fn refresh_statuses(
        &self,
        now: DateTime<Utc>,
        expiring_window: Duration,
    ) -> Result<usize, StoreError> {
        Ok(self.state.write().refresh_statuses(now, expiring_window))
    }

    async fn revisions(&self, id: &CertificateId) -> Result<Vec<CertificateRevision>, StoreError> {
        Ok(self.state.read().revisions(id))
    }

    async fn archive(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(self.state.write().archive(domain_name))
    }

    async fn append_renewal_log(&self, log: RenewalLog) -> Result<(), StoreError> {
        self.logs.write().push(log);
        Ok(())
    }

    async fn renewal_logs(&self, limit: usize) -> Result<Vec<RenewalLog>, StoreError> {
        Ok(latest_logs(&self.logs.read(), limit))
    }
}
