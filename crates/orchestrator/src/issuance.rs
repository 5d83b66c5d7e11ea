//! Issuance pipeline shared by batch activation, the renewal sweep and
//! manual renewal.
//!
//! One cycle races the certificate authority against a deadline. A failed or
//! timed-out cycle may be replaced by a self-signed certificate when the
//! caller allows it; otherwise the failure is recorded on the row.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use certward_common::CertificateProvider;

use crate::acme::{CertificateAuthority, IssuedCertificate};
use crate::error::ActivationError;
use crate::fallback::SelfSignedGenerator;
use crate::metrics::OrchestratorMetrics;
use crate::store::{Certificate, CertificateMaterial, CertificateStore};

/// Authority, fallback and store wired together
#[derive(Clone)]
pub struct IssuancePipeline {
    authority: Arc<dyn CertificateAuthority>,
    store: Arc<dyn CertificateStore>,
    fallback: SelfSignedGenerator,
    metrics: OrchestratorMetrics,
}

impl IssuancePipeline {
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        store: Arc<dyn CertificateStore>,
        fallback: SelfSignedGenerator,
        metrics: OrchestratorMetrics,
    ) -> Self {
        Self {
            authority,
            store,
            fallback,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    /// Run one authority issuance, abandoned at `timeout`
    ///
    /// Dropping the issuance future on timeout withdraws any challenge it
    /// published.
    pub async fn request(
        &self,
        domain_name: &str,
        timeout: Duration,
    ) -> Result<IssuedCertificate, ActivationError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, self.authority.issue(domain_name)).await
        {
            Ok(Ok(issued)) => Ok(issued),
            Ok(Err(e)) => Err(ActivationError::from(e)),
            Err(_) => Err(ActivationError::AuthorityTimeout(timeout)),
        };

        let elapsed = start.elapsed();
        self.metrics
            .observe_authority(result.is_ok(), elapsed.as_secs_f64());

        if let Err(e) = &result {
            warn!(
                domain = %domain_name,
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "Authority issuance failed"
            );
        }
        result
    }

    /// Persist authority-issued material as the active certificate
    pub async fn persist_issued(
        &self,
        domain_name: &str,
        issued: IssuedCertificate,
    ) -> Result<Certificate, ActivationError> {
        let material = CertificateMaterial {
            certificate_pem: issued.certificate_pem,
            private_key_pem: issued.private_key_pem,
            chain_pem: issued.chain_pem,
        };
        let certificate = self
            .store
            .upsert_active(
                domain_name,
                material,
                CertificateProvider::Authority,
                issued.expires_at,
            )
            .await?;

        self.metrics.record_issuance(CertificateProvider::Authority);
        info!(
            domain = %domain_name,
            expires = %issued.expires_at,
            revision = certificate.revision,
            "Stored authority certificate"
        );
        Ok(certificate)
    }

    /// Replace the certificate with a self-signed one, keeping `cause` as
    /// the row's last error
    pub async fn persist_fallback(
        &self,
        domain_name: &str,
        cause: &ActivationError,
    ) -> Result<Certificate, ActivationError> {
        let generated = self.fallback.generate(domain_name).inspect_err(|e| {
            self.metrics.record_failure("fallback_generation");
            warn!(domain = %domain_name, error = %e, "Fallback generation failed");
        })?;

        let material = CertificateMaterial {
            certificate_pem: generated.certificate_pem,
            private_key_pem: generated.private_key_pem,
            chain_pem: String::new(),
        };
        let certificate = self
            .store
            .upsert_active(
                domain_name,
                material,
                CertificateProvider::SelfSigned,
                generated.expires_at,
            )
            .await?;
        let certificate = self
            .store
            .record_renewal_attempt(&certificate.id, false, Some(&cause.to_string()))
            .await?;

        self.metrics.record_issuance(CertificateProvider::SelfSigned);
        warn!(
            domain = %domain_name,
            serial = %generated.serial_hex,
            expires = %generated.expires_at,
            cause = %cause,
            "Serving self-signed fallback certificate"
        );
        Ok(certificate)
    }

    /// Full cycle: authority, then fallback or failure bookkeeping
    pub async fn activate(
        &self,
        domain_name: &str,
        timeout: Duration,
        fallback_to_self_signed: bool,
    ) -> Result<Certificate, ActivationError> {
        debug!(domain = %domain_name, timeout_ms = timeout.as_millis() as u64, "Activating");

        match self.request(domain_name, timeout).await {
            Ok(issued) => self.persist_issued(domain_name, issued).await,
            Err(e) => {
                self.metrics.record_failure(e.kind());
                if fallback_to_self_signed && e.triggers_fallback() {
                    return self.persist_fallback(domain_name, &e).await;
                }
                if e.triggers_fallback() {
                    self.store.record_failure(domain_name, &e.to_string()).await?;
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for IssuancePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuancePipeline")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}
