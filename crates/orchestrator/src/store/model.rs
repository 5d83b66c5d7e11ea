//! Persisted certificate records and renewal audit entries.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use certward_common::{CertificateId, CertificateProvider, CertificateStatus, RenewalLogId};

/// PEM material of a certificate
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMaterial {
    /// Leaf certificate
    pub certificate_pem: String,
    /// Private key of the leaf
    pub private_key_pem: String,
    /// Trust chain after the leaf (empty for self-signed material)
    #[serde(default)]
    pub chain_pem: String,
}

// Keys never end up in logs
impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("certificate_pem_len", &self.certificate_pem.len())
            .field("private_key_pem", &"<redacted>")
            .field("chain_pem_len", &self.chain_pem.len())
            .finish()
    }
}

/// Current certificate record for one domain name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    /// Exact name the certificate covers
    pub domain_name: String,
    pub status: CertificateStatus,
    pub provider: Option<CertificateProvider>,
    /// Absent only for a first activation that failed
    pub material: Option<CertificateMaterial>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub last_renewal_attempt: Option<DateTime<Utc>>,
    pub last_renewal_error: Option<String>,
    /// Incremented every time material is replaced
    pub revision: u32,
    /// Superseded by external policy (domain removed)
    #[serde(default)]
    pub archived: bool,
}

impl Certificate {
    /// Time left before expiry; negative once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|expires| expires - now)
    }

    /// Whole days left before expiry
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.remaining(now).map(|left| left.num_days())
    }

    /// Whether the record carries material that has not expired yet
    pub fn has_valid_material(&self, now: DateTime<Utc>) -> bool {
        self.material.is_some() && self.expires_at.is_some_and(|expires| expires > now)
    }

    /// Valid for more than `threshold_days`; such certificates are left alone
    pub fn is_fresh(&self, now: DateTime<Utc>, threshold_days: u32) -> bool {
        self.material.is_some()
            && self
                .remaining(now)
                .is_some_and(|left| left > Duration::days(i64::from(threshold_days)))
    }

    /// Status implied by the expiry time, for records that carry material
    pub fn status_at(&self, now: DateTime<Utc>, expiring_window: Duration) -> CertificateStatus {
        match (self.status, self.material.as_ref(), self.expires_at) {
            (CertificateStatus::Failed | CertificateStatus::Pending, _, _) => self.status,
            (_, Some(_), Some(expires)) if expires <= now => CertificateStatus::Expired,
            (_, Some(_), Some(expires)) if expires - now <= expiring_window => {
                CertificateStatus::ExpiringSoon
            }
            (_, Some(_), Some(_)) => CertificateStatus::Active,
            _ => self.status,
        }
    }
}

/// Archived material of an earlier revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRevision {
    pub certificate_id: CertificateId,
    pub revision: u32,
    pub provider: Option<CertificateProvider>,
    pub material: CertificateMaterial,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub archived_at: DateTime<Utc>,
}

/// Outcome of one certificate inside a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalLogEntry {
    pub certificate_id: CertificateId,
    pub domain_name: String,
    pub success: bool,
    pub provider: Option<CertificateProvider>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Append-only audit record of one sweep run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalLog {
    pub id: RenewalLogId,
    pub run_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub entries: Vec<RenewalLogEntry>,
}

impl RenewalLog {
    /// Build a log from its entries, deriving the counters
    pub fn from_entries(
        run_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        entries: Vec<RenewalLogEntry>,
    ) -> Self {
        let succeeded = entries.iter().filter(|e| e.success).count();
        Self {
            id: RenewalLogId::new(),
            run_at,
            finished_at,
            processed: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
            entries,
        }
    }
}
