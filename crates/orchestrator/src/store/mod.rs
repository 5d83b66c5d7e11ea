//! Certificate store
//!
//! Single source of truth for certificate rows, shared by the batch
//! coordinator, the renewal sweeper and manual renewal. Each domain name
//! has at most one current row; replacing material archives the previous
//! revision instead of deleting it.

mod file;
mod memory;
mod model;
mod state;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use certward_common::{CertificateId, CertificateProvider};

pub use file::FileCertificateStore;
pub use memory::MemoryCertificateStore;
pub use model::{
    Certificate, CertificateMaterial, CertificateRevision, RenewalLog, RenewalLogEntry,
};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("certificate not found: {0}")]
    NotFound(String),
}

/// Persistence of certificate rows, revisions and renewal logs
///
/// Writes are serialized per backend.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Replace (or create) the current row for `domain_name` with new material
    ///
    /// The only operation that marks a row `active` and clears
    /// `last_renewal_error`.
    async fn upsert_active(
        &self,
        domain_name: &str,
        material: CertificateMaterial,
        provider: CertificateProvider,
        expires_at: DateTime<Utc>,
    ) -> Result<Certificate, StoreError>;

    /// Current row for `domain_name`, if it carries material
    async fn find_active(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError>;

    /// Current row for `domain_name` in any state
    async fn find_by_domain(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError>;

    async fn get(&self, id: &CertificateId) -> Result<Option<Certificate>, StoreError>;

    /// Rows with material expiring at or before `threshold`, soonest first
    async fn find_expiring_before(
        &self,
        threshold: DateTime<Utc>,
        auto_renew_only: bool,
    ) -> Result<Vec<Certificate>, StoreError>;

    /// Record the outcome of a renewal attempt; never touches material
    async fn record_renewal_attempt(
        &self,
        id: &CertificateId,
        success: bool,
        error: Option<&str>,
    ) -> Result<Certificate, StoreError>;

    /// Record a failed activation without fallback
    async fn record_failure(
        &self,
        domain_name: &str,
        error: &str,
    ) -> Result<Certificate, StoreError>;

    async fn set_auto_renew(
        &self,
        id: &CertificateId,
        enabled: bool,
    ) -> Result<Certificate, StoreError>;

    /// Move rows along `active → expiring_soon → expired`; returns the
    /// number of rows that changed
    async fn refresh_statuses(
        &self,
        now: DateTime<Utc>,
        expiring_window: Duration,
    ) -> Result<usize, StoreError>;

    /// Archived material of earlier revisions, oldest first
    async fn revisions(&self, id: &CertificateId) -> Result<Vec<CertificateRevision>, StoreError>;

    /// Retire the current row of `domain_name`
    async fn archive(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError>;

    async fn append_renewal_log(&self, log: RenewalLog) -> Result<(), StoreError>;

    /// Most recent renewal logs first
    async fn renewal_logs(&self, limit: usize) -> Result<Vec<RenewalLog>, StoreError>;
}
