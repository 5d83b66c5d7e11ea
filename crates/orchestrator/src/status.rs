//! Read-only views returned to callers polling the orchestrator

use chrono::{DateTime, Utc};
use serde::Serialize;

use certward_common::{
    CertificateId, CertificateProvider, CertificateStatus, DomainResultStatus, JobId, JobStatus,
};

use crate::batch::{BatchJob, DomainResult};
use crate::store::Certificate;

/// Certificate state for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateStatusView {
    pub status: CertificateStatus,
    pub provider: Option<CertificateProvider>,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_until_expiry: Option<i64>,
    pub last_error: Option<String>,
}

impl CertificateStatusView {
    /// Domain without any certificate record
    pub fn pending() -> Self {
        Self {
            status: CertificateStatus::Pending,
            provider: None,
            expires_at: None,
            days_until_expiry: None,
            last_error: None,
        }
    }

    /// Status is recomputed from the expiry time
    pub fn from_certificate(
        certificate: &Certificate,
        now: DateTime<Utc>,
        expiring_window: chrono::Duration,
    ) -> Self {
        Self {
            status: certificate.status_at(now, expiring_window),
            provider: certificate.provider,
            expires_at: certificate.expires_at,
            days_until_expiry: certificate.days_until_expiry(now),
            last_error: certificate.last_renewal_error.clone(),
        }
    }
}

/// Certificate record without key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    pub id: CertificateId,
    pub domain_name: String,
    pub status: CertificateStatus,
    pub provider: Option<CertificateProvider>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub revision: u32,
    pub last_renewal_error: Option<String>,
}

impl From<&Certificate> for CertificateSummary {
    fn from(certificate: &Certificate) -> Self {
        Self {
            id: certificate.id.clone(),
            domain_name: certificate.domain_name.clone(),
            status: certificate.status,
            provider: certificate.provider,
            issued_at: certificate.issued_at,
            expires_at: certificate.expires_at,
            renewed_at: certificate.renewed_at,
            auto_renew: certificate.auto_renew,
            revision: certificate.revision,
            last_renewal_error: certificate.last_renewal_error.clone(),
        }
    }
}

/// Polling view of a batch job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Settled domains
    pub progress: usize,
    pub total: usize,
    pub percentage: u8,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<DomainResult>,
    pub error: Option<String>,
}

impl BatchProgress {
    /// Results that have not settled yet are left out
    pub fn settled_results(&self) -> impl Iterator<Item = &DomainResult> {
        self.results
            .iter()
            .filter(|r| r.status != DomainResultStatus::Pending)
    }
}

impl From<&BatchJob> for BatchProgress {
    fn from(job: &BatchJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.completed,
            total: job.total,
            percentage: job.percentage(),
            succeeded: job.succeeded(),
            failed: job.failed(),
            results: job.results.clone(),
            error: job.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CertificateMaterial;

    fn certificate(expires_in_days: i64) -> Certificate {
        let now = Utc::now();
        Certificate {
            id: CertificateId::new(),
            domain_name: "checkout.shop.example.com".to_string(),
            status: CertificateStatus::Active,
            provider: Some(CertificateProvider::SelfSigned),
            material: Some(CertificateMaterial {
                certificate_pem: "cert".to_string(),
                private_key_pem: "key".to_string(),
                chain_pem: String::new(),
            }),
            issued_at: Some(now),
            expires_at: Some(now + chrono::Duration::days(expires_in_days)),
            renewed_at: None,
            auto_renew: true,
            last_renewal_attempt: Some(now),
            last_renewal_error: Some("certificate authority timed out after 60s".to_string()),
            revision: 1,
            archived: false,
        }
    }

    #[test]
    fn test_status_view_from_certificate() {
        let cert = certificate(30);
        let window = chrono::Duration::days(7);
        let view = CertificateStatusView::from_certificate(&cert, Utc::now(), window);

        assert_eq!(view.status, CertificateStatus::Active);
        assert_eq!(view.provider, Some(CertificateProvider::SelfSigned));
        assert!(matches!(view.days_until_expiry, Some(29..=30)));
        assert!(view.last_error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_status_view_tracks_expiry() {
        let window = chrono::Duration::days(30);
        let expiring = certificate(5);
        let view = CertificateStatusView::from_certificate(&expiring, Utc::now(), window);
        assert_eq!(view.status, CertificateStatus::ExpiringSoon);

        let expired = certificate(-1);
        let view = CertificateStatusView::from_certificate(&expired, Utc::now(), window);
        assert_eq!(view.status, CertificateStatus::Expired);
    }

    #[test]
    fn test_summary_leaves_out_material() {
        let cert = certificate(90);
        let summary = CertificateSummary::from(&cert);
        let json = serde_json::to_string(&summary).unwrap();

        assert_eq!(summary.id, cert.id);
        assert!(!json.contains("private_key"));
    }

    #[test]
    fn test_pending_view() {
        let view = CertificateStatusView::pending();
        assert_eq!(view.status, CertificateStatus::Pending);
        assert!(view.expires_at.is_none());
    }
}
