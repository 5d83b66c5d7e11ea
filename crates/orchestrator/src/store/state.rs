//! Store state shared by the memory and file backends.
//!
//! Mutations take `now` explicitly; the backends pass `Utc::now()`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use certward_common::{CertificateId, CertificateProvider, CertificateStatus};

use super::model::{Certificate, CertificateMaterial, CertificateRevision};
use super::StoreError;

/// Archived revisions kept per certificate; older ones are dropped
pub(crate) const MAX_REVISIONS_PER_CERTIFICATE: usize = 10;

/// Rows and revision history, as persisted in `certificates.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    certificates: Vec<Certificate>,
    #[serde(default)]
    revisions: Vec<CertificateRevision>,
}

impl StoreState {
    fn position_by_id(&self, id: &CertificateId) -> Option<usize> {
        self.certificates.iter().position(|c| &c.id == id)
    }

    fn position_by_domain(&self, domain_name: &str) -> Option<usize> {
        self.certificates
            .iter()
            .position(|c| !c.archived && c.domain_name == domain_name)
    }

    fn by_id_mut(&mut self, id: &CertificateId) -> Result<&mut Certificate, StoreError> {
        let index = self
            .position_by_id(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(&mut self.certificates[index])
    }

    pub(crate) fn upsert_active(
        &mut self,
        domain_name: &str,
        material: CertificateMaterial,
        provider: CertificateProvider,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Certificate {
        let Some(index) = self.position_by_domain(domain_name) else {
            let certificate = Certificate {
                id: CertificateId::new(),
                domain_name: domain_name.to_string(),
                status: CertificateStatus::Active,
                provider: Some(provider),
                material: Some(material),
                issued_at: Some(now),
                expires_at: Some(expires_at),
                renewed_at: None,
                auto_renew: true,
                last_renewal_attempt: None,
                last_renewal_error: None,
                revision: 1,
                archived: false,
            };
            debug!(domain = %domain_name, id = %certificate.id, "Created certificate row");
            self.certificates.push(certificate.clone());
            return certificate;
        };

        let existing = &mut self.certificates[index];
        let previous = existing.material.replace(material);
        let had_material = previous.is_some();
        if let Some(previous) = previous {
            self.revisions.push(CertificateRevision {
                certificate_id: existing.id.clone(),
                revision: existing.revision,
                provider: existing.provider,
                material: previous,
                issued_at: existing.issued_at,
                expires_at: existing.expires_at,
                archived_at: now,
            });
            prune_revisions(&mut self.revisions, &existing.id);
        }

        existing.status = CertificateStatus::Active;
        existing.provider = Some(provider);
        existing.issued_at = Some(now);
        existing.expires_at = Some(expires_at);
        if had_material {
            existing.renewed_at = Some(now);
        }
        existing.last_renewal_error = None;
        existing.revision += 1;

        debug!(
            domain = %domain_name,
            id = %existing.id,
            revision = existing.revision,
            "Replaced certificate material"
        );
        existing.clone()
    }

    pub(crate) fn find_active(&self, domain_name: &str) -> Option<Certificate> {
        trace!(domain = %domain_name, "Looking up active certificate");
        self.position_by_domain(domain_name)
            .map(|index| &self.certificates[index])
            .filter(|c| c.material.is_some())
            .cloned()
    }

    pub(crate) fn find_by_domain(&self, domain_name: &str) -> Option<Certificate> {
        self.position_by_domain(domain_name)
            .map(|index| self.certificates[index].clone())
    }

    pub(crate) fn get(&self, id: &CertificateId) -> Option<Certificate> {
        self.position_by_id(id).map(|index| self.certificates[index].clone())
    }

    pub(crate) fn find_expiring_before(
        &self,
        threshold: DateTime<Utc>,
        auto_renew_only: bool,
    ) -> Vec<Certificate> {
        let mut found: Vec<Certificate> = self
            .certificates
            .iter()
            .filter(|c| !c.archived && c.material.is_some())
            .filter(|c| !auto_renew_only || c.auto_renew)
            .filter(|c| c.expires_at.is_some_and(|expires| expires <= threshold))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.expires_at);
        found
    }

    pub(crate) fn record_renewal_attempt(
        &mut self,
        id: &CertificateId,
        success: bool,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Certificate, StoreError> {
        let certificate = self.by_id_mut(id)?;
        certificate.last_renewal_attempt = Some(now);

        if success {
            certificate.last_renewal_error = None;
        } else {
            certificate.last_renewal_error =
                Some(error.unwrap_or("renewal failed").to_string());
            if !certificate.has_valid_material(now) {
                certificate.status = CertificateStatus::Failed;
            }
        }

        Ok(certificate.clone())
    }

    pub(crate) fn record_failure(
        &mut self,
        domain_name: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Certificate {
        match self.position_by_domain(domain_name) {
            Some(index) => {
                let certificate = &mut self.certificates[index];
                certificate.last_renewal_attempt = Some(now);
                certificate.last_renewal_error = Some(error.to_string());
                if !certificate.has_valid_material(now) {
                    certificate.status = CertificateStatus::Failed;
                }
                certificate.clone()
            }
            None => {
                let certificate = Certificate {
                    id: CertificateId::new(),
                    domain_name: domain_name.to_string(),
                    status: CertificateStatus::Failed,
                    provider: None,
                    material: None,
                    issued_at: None,
                    expires_at: None,
                    renewed_at: None,
                    auto_renew: true,
                    last_renewal_attempt: Some(now),
                    last_renewal_error: Some(error.to_string()),
                    revision: 0,
                    archived: false,
                };
                self.certificates.push(certificate.clone());
                certificate
            }
        }
    }

    pub(crate) fn set_auto_renew(
        &mut self,
        id: &CertificateId,
        enabled: bool,
    ) -> Result<Certificate, StoreError> {
        let certificate = self.by_id_mut(id)?;
        certificate.auto_renew = enabled;
        Ok(certificate.clone())
    }

    /// Rows whose stored status no longer matches their expiry
    pub(crate) fn stale_statuses(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.certificates
            .iter()
            .filter(|c| !c.archived && c.status_at(now, window) != c.status)
            .count()
    }

    pub(crate) fn refresh_statuses(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut changed = 0;
        for certificate in self.certificates.iter_mut().filter(|c| !c.archived) {
            let next = certificate.status_at(now, window);
            if next != certificate.status {
                debug!(
                    domain = %certificate.domain_name,
                    from = %certificate.status,
                    to = %next,
                    "Certificate status changed"
                );
                certificate.status = next;
                changed += 1;
            }
        }
        changed
    }

    pub(crate) fn revisions(&self, id: &CertificateId) -> Vec<CertificateRevision> {
        self.revisions
            .iter()
            .filter(|r| &r.certificate_id == id)
            .cloned()
            .collect()
    }

    pub(crate) fn archive(&mut self, domain_name: &str) -> Option<Certificate> {
        let index = self.position_by_domain(domain_name)?;
        let certificate = &mut self.certificates[index];
        certificate.archived = true;
        Some(certificate.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.certificates.len()
    }
}

fn prune_revisions(revisions: &mut Vec<CertificateRevision>, id: &CertificateId) {
    let kept = revisions.iter().filter(|r| &r.certificate_id == id).count();
    let mut excess = kept.saturating_sub(MAX_REVISIONS_PER_CERTIFICATE);
    if excess == 0 {
        return;
    }
    // Revisions are appended in order, so the first matches are the oldest
    revisions.retain(|r| {
        if excess > 0 && &r.certificate_id == id {
            excess -= 1;
            return false;
        }
        true
    });
}

/// Renewal logs, most recent first, at most `limit`
pub(crate) fn latest_logs<T: Clone>(logs: &[T], limit: usize) -> Vec<T> {
    logs.iter().rev().take(limit).cloned().collect()
}
