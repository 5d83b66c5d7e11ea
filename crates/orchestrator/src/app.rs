//! Orchestrator facade
//!
//! Wires the registry, store, authority, batch coordinator and scheduler
//! together and exposes the operations callers use: batch submit and poll,
//! manual renewal, certificate status and scheduler control.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use certward_common::{CertificateId, DomainId, JobId};
use certward_config::{BatchConfig, Config};

use crate::acme::{
    AccountStorage, AcmeClient, AcmeClientConfig, CertificateAuthority, ChallengeManager,
    ChallengeServer,
};
use crate::batch::{BatchCoordinator, BatchJob, BatchOptions};
use crate::error::{ActivationError, SetupError};
use crate::fallback::SelfSignedGenerator;
use crate::issuance::IssuancePipeline;
use crate::metrics::OrchestratorMetrics;
use crate::registry::{DomainRegistry, StaticDomainRegistry};
use crate::scheduler::{RenewalSweeper, SchedulerHandle, SweepSettings};
use crate::status::{BatchProgress, CertificateStatusView, CertificateSummary};
use crate::store::{Certificate, CertificateStore, FileCertificateStore};

/// What a manual renewal targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewTarget {
    Certificate(CertificateId),
    Domain(DomainId),
}

/// Manual renewal settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewOptions {
    pub timeout: Duration,
    pub fallback_to_self_signed: bool,
    /// Renew even when the certificate is still fresh
    pub force: bool,
}

impl RenewOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            fallback_to_self_signed: config.fallback_to_self_signed,
            force: false,
        }
    }
}

impl Default for RenewOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

/// Certificate lifecycle orchestrator
pub struct Orchestrator {
    config: Config,
    registry: Arc<dyn DomainRegistry>,
    pipeline: IssuancePipeline,
    batch: BatchCoordinator,
    scheduler: SchedulerHandle,
    challenges: ChallengeManager,
}

impl Orchestrator {
    /// Assemble from explicit collaborators
    pub fn new(
        config: Config,
        registry: Arc<dyn DomainRegistry>,
        authority: Arc<dyn CertificateAuthority>,
        store: Arc<dyn CertificateStore>,
        challenges: ChallengeManager,
        metrics: OrchestratorMetrics,
    ) -> Self {
        let pipeline = IssuancePipeline::new(
            authority,
            store,
            SelfSignedGenerator::new(config.fallback.validity_days),
            metrics,
        );
        let batch = BatchCoordinator::new(registry.clone(), pipeline.clone(), &config.batch);
        let sweeper = RenewalSweeper::new(
            pipeline.clone(),
            SweepSettings::from_config(&config.renewal),
        );
        let scheduler = SchedulerHandle::new(Arc::new(sweeper), config.renewal.clone());

        Self {
            config,
            registry,
            pipeline,
            batch,
            scheduler,
            challenges,
        }
    }

    /// Production wiring: file store, ACME client and the config-seeded
    /// registry
    pub fn from_config(config: Config) -> Result<Self, SetupError> {
        let store = FileCertificateStore::open(&config.storage.path)?;
        let account = AccountStorage::new(&config.storage.path.join("acme"))?;

        let challenges = match &config.challenge.webroot {
            Some(webroot) => ChallengeManager::with_webroot(webroot),
            None => ChallengeManager::new(),
        };

        let client = AcmeClient::new(
            AcmeClientConfig {
                directory: config.acme.directory_url().to_string(),
                contact_email: config.acme.email.clone(),
                validation_timeout: Duration::from_secs(config.acme.validation_timeout_secs),
            },
            account,
            challenges.clone(),
        );
        let registry = StaticDomainRegistry::from_config(&config);
        let metrics = OrchestratorMetrics::new()?;

        info!(
            directory = %config.acme.directory_url(),
            storage = %config.storage.path.display(),
            domains = registry.len(),
            "Orchestrator initialized"
        );

        Ok(Self::new(
            config,
            Arc::new(registry),
            Arc::new(client),
            Arc::new(store),
            challenges,
            metrics,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        self.pipeline.store()
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        self.pipeline.metrics()
    }

    pub fn challenges(&self) -> &ChallengeManager {
        &self.challenges
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Listener answering HTTP-01 probes for this orchestrator's challenges
    pub fn challenge_server(&self) -> ChallengeServer {
        ChallengeServer::new(self.challenges.clone()).with_metrics(self.metrics().clone())
    }

    /// Start a batch activation in the background
    pub fn submit_batch(&self, domain_ids: Vec<DomainId>, options: BatchOptions) -> JobId {
        self.batch.submit(domain_ids, options)
    }

    /// Run a batch activation to completion
    pub async fn activate_batch(
        &self,
        domain_ids: Vec<DomainId>,
        options: BatchOptions,
    ) -> BatchJob {
        self.batch.activate(domain_ids, options).await
    }

    /// Progress of a retained batch job
    pub fn batch_status(&self, job_id: &JobId) -> Option<BatchProgress> {
        self.batch.job(job_id).map(|job| BatchProgress::from(&job))
    }

    /// Run one renewal cycle now
    ///
    /// Without `force`, a certificate that is still fresh is returned
    /// unchanged and the authority is not contacted. A certificate that has
    /// not expired is never replaced by a self-signed one.
    pub async fn renew(
        &self,
        target: RenewTarget,
        options: RenewOptions,
    ) -> Result<CertificateSummary, ActivationError> {
        let (domain_name, existing) = self.resolve_target(&target).await?;
        let now = Utc::now();

        if let Some(current) = &existing {
            if !options.force && current.is_fresh(now, self.config.batch.fresh_threshold_days) {
                debug!(domain = %domain_name, "Certificate still fresh, renewal skipped");
                return Ok(CertificateSummary::from(current));
            }
        }

        info!(domain = %domain_name, force = options.force, "Manual renewal requested");
        let certificate = match existing {
            Some(current) if current.has_valid_material(now) => {
                self.renew_valid(&current, options.timeout).await?
            }
            existing => {
                let certificate = self
                    .pipeline
                    .activate(&domain_name, options.timeout, options.fallback_to_self_signed)
                    .await?;
                if existing.is_some() && certificate.last_renewal_error.is_none() {
                    self.store()
                        .record_renewal_attempt(&certificate.id, true, None)
                        .await?
                } else {
                    certificate
                }
            }
        };

        Ok(CertificateSummary::from(&certificate))
    }

    /// Authority-only cycle; a failure is recorded and the material kept
    async fn renew_valid(
        &self,
        current: &Certificate,
        timeout: Duration,
    ) -> Result<Certificate, ActivationError> {
        let name = current.domain_name.as_str();
        match self.pipeline.request(name, timeout).await {
            Ok(issued) => {
                let renewed = self.pipeline.persist_issued(name, issued).await?;
                Ok(self
                    .store()
                    .record_renewal_attempt(&renewed.id, true, None)
                    .await?)
            }
            Err(e) => {
                self.metrics().record_failure(e.kind());
                self.store()
                    .record_renewal_attempt(&current.id, false, Some(&e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    /// Certificate state of a registered domain
    pub async fn certificate_status(
        &self,
        domain_id: &DomainId,
    ) -> Result<CertificateStatusView, ActivationError> {
        let domain = self
            .registry
            .get_domain(domain_id)
            .await?
            .ok_or_else(|| ActivationError::DomainNotFound(domain_id.clone()))?;

        let window = chrono::Duration::days(i64::from(self.config.renewal.days_before_expiry));
        Ok(match self.store().find_by_domain(&domain.full_name).await? {
            Some(certificate) => {
                CertificateStatusView::from_certificate(&certificate, Utc::now(), window)
            }
            None => CertificateStatusView::pending(),
        })
    }

    async fn resolve_target(
        &self,
        target: &RenewTarget,
    ) -> Result<(String, Option<Certificate>), ActivationError> {
        match target {
            RenewTarget::Certificate(id) => {
                let certificate = self
                    .store()
                    .get(id)
                    .await?
                    .ok_or_else(|| ActivationError::CertificateNotFound(id.to_string()))?;
                Ok((certificate.domain_name.clone(), Some(certificate)))
            }
            RenewTarget::Domain(id) => {
                let domain = self
                    .registry
                    .get_domain(id)
                    .await?
                    .ok_or_else(|| ActivationError::DomainNotFound(id.clone()))?;
                if !domain.is_verified() {
                    return Err(ActivationError::DomainNotVerified(id.clone()));
                }
                let existing = self.store().find_by_domain(&domain.full_name).await?;
                Ok((domain.full_name, existing))
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.pipeline)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
