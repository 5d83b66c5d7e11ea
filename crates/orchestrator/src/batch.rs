//! Batch activation coordinator
//!
//! Activates certificates for a set of domains under bounded concurrency.
//! Eligible domains are split into consecutive chunks of `max_concurrent`;
//! a chunk starts only after the previous one has fully settled, and every
//! outcome inside a chunk is collected even when some fail.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use certward_common::{
    CertificateId, CertificateProvider, DomainId, DomainResultStatus, JobId, JobStatus,
};
use certward_config::BatchConfig;

use crate::error::ActivationError;
use crate::issuance::IssuancePipeline;
use crate::registry::{Domain, DomainRegistry};

/// Per-request batch settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Authority deadline per domain
    pub timeout: Duration,
    /// Chunk size; values below 1 are treated as 1
    pub max_concurrent: usize,
    pub fallback_to_self_signed: bool,
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_concurrent: config.max_concurrent,
            fallback_to_self_signed: config.fallback_to_self_signed,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

/// Outcome for one requested domain id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResult {
    pub domain_id: DomainId,
    pub domain_name: Option<String>,
    pub status: DomainResultStatus,
    pub provider: Option<CertificateProvider>,
    pub certificate_id: Option<CertificateId>,
    pub error: Option<String>,
    /// Already had a fresh certificate; the authority was not contacted
    #[serde(default)]
    pub skipped: bool,
}

impl DomainResult {
    fn pending(domain_id: DomainId) -> Self {
        Self {
            domain_id,
            domain_name: None,
            status: DomainResultStatus::Pending,
            provider: None,
            certificate_id: None,
            error: None,
            skipped: false,
        }
    }

    fn failed(domain_id: DomainId, domain_name: Option<String>, err: &ActivationError) -> Self {
        Self {
            domain_id,
            domain_name,
            status: DomainResultStatus::Failed,
            provider: None,
            certificate_id: None,
            error: Some(err.to_string()),
            skipped: false,
        }
    }
}

/// A batch activation and its progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: JobId,
    pub domain_ids: Vec<DomainId>,
    /// One entry per requested id, in request order
    pub results: Vec<DomainResult>,
    pub status: JobStatus,
    pub total: usize,
    pub completed: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set only when the whole job failed
    pub error: Option<String>,
}

impl BatchJob {
    fn new(domain_ids: Vec<DomainId>) -> Self {
        Self {
            id: JobId::new(),
            results: domain_ids.iter().cloned().map(DomainResult::pending).collect(),
            total: domain_ids.len(),
            domain_ids,
            status: JobStatus::Pending,
            completed: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Settled share of the job, 0..=100
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100) / self.total) as u8
    }

    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == DomainResultStatus::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == DomainResultStatus::Failed)
            .count()
    }

    fn settle(&mut self, index: usize, result: DomainResult) {
        if let Some(slot) = self.results.get_mut(index) {
            if slot.status == DomainResultStatus::Pending {
                self.completed += 1;
            }
            *slot = result;
        }
    }
}

/// Jobs kept for polling; finished jobs expire after the retention period
#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<JobId, BatchJob>,
    retention: chrono::Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(1)),
        }
    }

    fn insert(&self, job: BatchJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    fn update<R>(&self, id: &JobId, f: impl FnOnce(&mut BatchJob) -> R) -> Option<R> {
        self.jobs.get_mut(id).map(|mut job| f(job.value_mut()))
    }

    /// Snapshot of a job; prunes expired jobs first
    pub fn get(&self, id: &JobId) -> Option<BatchJob> {
        self.prune(Utc::now());
        self.jobs.get(id).map(|job| job.value().clone())
    }

    /// Drop finished jobs older than the retention period
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            job.finished_at
                .is_none_or(|finished| finished + self.retention > now)
        });
        let pruned = before.saturating_sub(self.jobs.len());
        if pruned > 0 {
            debug!(pruned = pruned, "Pruned finished batch jobs");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Drives batch activations
#[derive(Clone)]
pub struct BatchCoordinator {
    registry: Arc<dyn DomainRegistry>,
    pipeline: IssuancePipeline,
    jobs: Arc<JobRegistry>,
    chunk_pause: Duration,
    fresh_threshold_days: u32,
}

impl BatchCoordinator {
    pub fn new(
        registry: Arc<dyn DomainRegistry>,
        pipeline: IssuancePipeline,
        config: &BatchConfig,
    ) -> Self {
        Self {
            registry,
            pipeline,
            jobs: Arc::new(JobRegistry::new(Duration::from_secs(
                config.job_retention_secs,
            ))),
            chunk_pause: Duration::from_millis(config.chunk_pause_ms),
            fresh_threshold_days: config.fresh_threshold_days,
        }
    }

    /// Override the pause between chunks
    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    /// Run a batch to completion and return the finished job
    pub async fn activate(&self, domain_ids: Vec<DomainId>, options: BatchOptions) -> BatchJob {
        let job = BatchJob::new(domain_ids);
        let id = job.id.clone();
        self.jobs.insert(job.clone());

        self.run(&id, job.domain_ids.clone(), options)
            .await
            .unwrap_or(job)
    }

    /// Start a batch in the background and return its id immediately
    pub fn submit(&self, domain_ids: Vec<DomainId>, options: BatchOptions) -> JobId {
        let job = BatchJob::new(domain_ids);
        let id = job.id.clone();
        let domain_ids = job.domain_ids.clone();
        self.jobs.insert(job);

        let coordinator = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            coordinator.run(&job_id, domain_ids, options).await;
        });

        info!(job_id = %id, "Batch job submitted");
        id
    }

    /// Current state of a job, if it is still retained
    pub fn job(&self, id: &JobId) -> Option<BatchJob> {
        self.jobs.get(id)
    }

    /// Returns the finished job
    async fn run(
        &self,
        job_id: &JobId,
        domain_ids: Vec<DomainId>,
        options: BatchOptions,
    ) -> Option<BatchJob> {
        self.jobs.update(job_id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        });
        info!(job_id = %job_id, total = domain_ids.len(), "Batch job started");

        let eligible = match self.resolve(job_id, &domain_ids).await {
            Ok(eligible) => eligible,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Batch job aborted");
                self.pipeline.metrics().record_batch_job(JobStatus::Failed);
                return self.jobs.update(job_id, |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    job.finished_at = Some(Utc::now());
                    job.clone()
                });
            }
        };

        let chunk_size = options.max_concurrent.max(1);
        let chunk_count = eligible.len().div_ceil(chunk_size);

        for (chunk_index, chunk) in eligible.chunks(chunk_size).enumerate() {
            debug!(
                job_id = %job_id,
                chunk = chunk_index + 1,
                chunks = chunk_count,
                size = chunk.len(),
                "Processing chunk"
            );

            let outcomes = join_all(chunk.iter().map(|(index, domain)| async move {
                (*index, self.process(domain, &options).await)
            }))
            .await;

            self.jobs.update(job_id, |job| {
                for (index, result) in outcomes {
                    job.settle(index, result);
                }
            });

            if chunk_index + 1 < chunk_count && !self.chunk_pause.is_zero() {
                tokio::time::sleep(self.chunk_pause).await;
            }
        }

        let finished = self.jobs.update(job_id, |job| {
            job.status = JobStatus::Completed;
            job.finished_at = Some(Utc::now());
            job.clone()
        });
        self.pipeline
            .metrics()
            .record_batch_job(JobStatus::Completed);

        if let Some(job) = &finished {
            info!(
                job_id = %job_id,
                succeeded = job.succeeded(),
                failed = job.failed(),
                "Batch job completed"
            );
        }
        finished
    }

    /// Look every id up; rejected ids are settled immediately and take no
    /// slot in a chunk
    ///
    /// A lookup error only fails that id. The job fails when every lookup
    /// errored.
    async fn resolve(
        &self,
        job_id: &JobId,
        domain_ids: &[DomainId],
    ) -> Result<Vec<(usize, Domain)>, ActivationError> {
        let mut eligible = Vec::with_capacity(domain_ids.len());
        let mut rejected = Vec::new();
        let mut lookup_errors = 0;

        for (index, id) in domain_ids.iter().enumerate() {
            let lookup = match self.registry.get_domain(id).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    lookup_errors += 1;
                    if lookup_errors == domain_ids.len() {
                        return Err(e.into());
                    }
                    let err = ActivationError::from(e);
                    warn!(domain_id = %id, error = %err, "Domain lookup failed");
                    rejected.push((
                        index,
                        err.kind(),
                        DomainResult::failed(id.clone(), None, &err),
                    ));
                    continue;
                }
            };

            match lookup {
                None => {
                    let err = ActivationError::DomainNotFound(id.clone());
                    warn!(domain_id = %id, "Domain not found");
                    rejected.push((
                        index,
                        err.kind(),
                        DomainResult::failed(id.clone(), None, &err),
                    ));
                }
                Some(domain) if !domain.is_verified() => {
                    let err = ActivationError::DomainNotVerified(id.clone());
                    warn!(domain_id = %id, status = %domain.verification_status, "Domain not verified");
                    rejected.push((
                        index,
                        err.kind(),
                        DomainResult::failed(id.clone(), Some(domain.full_name), &err),
                    ));
                }
                Some(domain) => eligible.push((index, domain)),
            }
        }

        let metrics = self.pipeline.metrics();
        self.jobs.update(job_id, |job| {
            for (index, kind, result) in rejected {
                metrics.record_failure(kind);
                job.settle(index, result);
            }
        });

        Ok(eligible)
    }

    async fn process(&self, domain: &Domain, options: &BatchOptions) -> DomainResult {
        let name = domain.full_name.as_str();
        let store = self.pipeline.store();

        match store.find_active(name).await {
            Ok(Some(existing)) if existing.is_fresh(Utc::now(), self.fresh_threshold_days) => {
                debug!(domain = %name, expires = ?existing.expires_at, "Certificate still fresh");
                return DomainResult {
                    domain_id: domain.id.clone(),
                    domain_name: Some(name.to_string()),
                    status: DomainResultStatus::Success,
                    provider: existing.provider,
                    certificate_id: Some(existing.id),
                    error: None,
                    skipped: true,
                };
            }
            Ok(_) => {}
            Err(e) => {
                let err = ActivationError::from(e);
                return DomainResult::failed(domain.id.clone(), Some(name.to_string()), &err);
            }
        }

        match self
            .pipeline
            .activate(name, options.timeout, options.fallback_to_self_signed)
            .await
        {
            Ok(certificate) => DomainResult {
                domain_id: domain.id.clone(),
                domain_name: Some(name.to_string()),
                status: DomainResultStatus::Success,
                provider: certificate.provider,
                certificate_id: Some(certificate.id),
                error: certificate.last_renewal_error,
                skipped: false,
            },
            Err(e) => DomainResult::failed(domain.id.clone(), Some(name.to_string()), &e),
        }
    }
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("chunk_pause", &self.chunk_pause)
            .field("fresh_threshold_days", &self.fresh_threshold_days)
            .field("jobs", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::SelfSignedGenerator;
    use crate::issuance::testing::{Behavior, MockAuthority};
    use crate::metrics::OrchestratorMetrics;
    use crate::registry::{RegistryError, StaticDomainRegistry};
    use crate::store::{CertificateMaterial, CertificateStore, MemoryCertificateStore};
    use async_trait::async_trait;
    use certward_common::{CertificateStatus, VerificationStatus};

    fn registry(domains: &[(&str, VerificationStatus)]) -> StaticDomainRegistry {
        let registry = StaticDomainRegistry::new();
        for (id, status) in domains {
            registry.insert(Domain {
                id: DomainId::from(*id),
                name: format!("{id}.example.com"),
                full_name: format!("checkout.{id}.example.com"),
                verification_status: *status,
                store_id: None,
            });
        }
        registry
    }

    fn verified(ids: &[&'static str]) -> StaticDomainRegistry {
        let domains: Vec<_> = ids
            .iter()
            .map(|id| (*id, VerificationStatus::Verified))
            .collect();
        registry(&domains)
    }

    fn coordinator(
        registry: impl DomainRegistry + 'static,
        authority: Arc<MockAuthority>,
    ) -> (BatchCoordinator, Arc<MemoryCertificateStore>) {
        let store = Arc::new(MemoryCertificateStore::new());
        let pipeline = IssuancePipeline::new(
            authority,
            store.clone(),
            SelfSignedGenerator::default(),
            OrchestratorMetrics::new().unwrap(),
        );
        let coordinator =
            BatchCoordinator::new(Arc::new(registry), pipeline, &BatchConfig::default())
                .with_chunk_pause(Duration::ZERO);
        (coordinator, store)
    }

    fn ids(ids: &[&str]) -> Vec<DomainId> {
        ids.iter().map(|id| DomainId::from(*id)).collect()
    }

    fn options(max_concurrent: usize, fallback: bool) -> BatchOptions {
        BatchOptions {
            timeout: Duration::from_secs(60),
            max_concurrent,
            fallback_to_self_signed: fallback,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_bound_concurrency() {
        let authority = Arc::new(MockAuthority::new(Duration::from_millis(100)));
        let (coordinator, _store) = coordinator(
            verified(&["d1", "d2", "d3", "d4", "d5"]),
            authority.clone(),
        );

        let job = coordinator
            .activate(ids(&["d1", "d2", "d3", "d4", "d5"]), options(3, true))
            .await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed, 5);
        assert_eq!(job.percentage(), 100);
        assert_eq!(authority.calls(), 5);
        assert_eq!(authority.peak(), 3);

        let order = authority.order.lock().clone();
        let mut first_chunk = order[..3].to_vec();
        first_chunk.sort();
        assert_eq!(
            first_chunk,
            vec![
                "checkout.d1.example.com",
                "checkout.d2.example.com",
                "checkout.d3.example.com"
            ]
        );
        assert!(job
            .results
            .iter()
            .all(|r| r.status == DomainResultStatus::Success
                && r.provider == Some(CertificateProvider::Authority)));
    }

    #[tokio::test]
    async fn test_results_match_inputs_in_order() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let registry = registry(&[
            ("good", VerificationStatus::Verified),
            ("pending", VerificationStatus::Unverified),
        ]);
        let (coordinator, _store) = coordinator(registry, authority.clone());

        let job = coordinator
            .activate(ids(&["pending", "missing", "good"]), options(3, true))
            .await;

        assert_eq!(job.results.len(), 3);
        assert_eq!(job.results[0].domain_id, DomainId::from("pending"));
        assert_eq!(job.results[0].status, DomainResultStatus::Failed);
        assert!(job.results[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("not verified")));
        assert_eq!(job.results[1].status, DomainResultStatus::Failed);
        assert!(job.results[1].domain_name.is_none());
        assert_eq!(job.results[2].status, DomainResultStatus::Success);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_certificate_is_not_reissued() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let (coordinator, store) = coordinator(verified(&["d1"]), authority.clone());
        let existing = store
            .upsert_active(
                "checkout.d1.example.com",
                CertificateMaterial {
                    certificate_pem: "cert".to_string(),
                    private_key_pem: "key".to_string(),
                    chain_pem: String::new(),
                },
                CertificateProvider::Authority,
                Utc::now() + chrono::Duration::days(30),
            )
            .await
            .unwrap();

        let job = coordinator.activate(ids(&["d1"]), options(3, true)).await;

        assert_eq!(authority.calls(), 0);
        assert!(job.results[0].skipped);
        assert_eq!(job.results[0].status, DomainResultStatus::Success);
        assert_eq!(job.results[0].certificate_id, Some(existing.id.clone()));
        let after = store.get(&existing.id).await.unwrap().unwrap();
        assert_eq!(after, existing);
    }

    #[tokio::test]
    async fn test_failure_without_fallback() {
        let authority = Arc::new(
            MockAuthority::new(Duration::ZERO).with("checkout.d1.example.com", Behavior::Fail),
        );
        let (coordinator, store) = coordinator(verified(&["d1", "d2"]), authority);

        let job = coordinator
            .activate(ids(&["d1", "d2"]), options(3, false))
            .await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results[0].status, DomainResultStatus::Failed);
        assert_eq!(job.results[1].status, DomainResultStatus::Success);

        let row = store
            .find_by_domain("checkout.d1.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, CertificateStatus::Failed);
        assert_ne!(row.provider, Some(CertificateProvider::SelfSigned));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_self_signed() {
        let authority = Arc::new(
            MockAuthority::new(Duration::ZERO).with("checkout.d1.example.com", Behavior::Hang),
        );
        let (coordinator, store) = coordinator(verified(&["d1"]), authority);

        let job = coordinator.activate(ids(&["d1"]), options(1, true)).await;

        let result = &job.results[0];
        assert_eq!(result.status, DomainResultStatus::Success);
        assert_eq!(result.provider, Some(CertificateProvider::SelfSigned));
        assert!(result.error.as_deref().is_some_and(|e| e.contains("timed out")));

        let row = store
            .find_active("checkout.d1.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, CertificateStatus::Active);
        assert!(row.last_renewal_error.is_some());
    }

    struct UnavailableRegistry;

    #[async_trait]
    impl DomainRegistry for UnavailableRegistry {
        async fn get_domain(&self, _id: &DomainId) -> Result<Option<Domain>, RegistryError> {
            Err(RegistryError::Unavailable("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_registry_outage_fails_job() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let (coordinator, _store) = coordinator(UnavailableRegistry, authority.clone());

        let job = coordinator.activate(ids(&["d1", "d2"]), options(3, true)).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().is_some_and(|e| e.contains("unavailable")));
        assert_eq!(job.results.len(), 2);
        assert_eq!(authority.calls(), 0);
    }

    /// Fails lookups for the listed ids only
    struct FlakyRegistry {
        inner: StaticDomainRegistry,
        failing: Vec<DomainId>,
    }

    #[async_trait]
    impl DomainRegistry for FlakyRegistry {
        async fn get_domain(&self, id: &DomainId) -> Result<Option<Domain>, RegistryError> {
            if self.failing.contains(id) {
                return Err(RegistryError::Unavailable("connection reset".to_string()));
            }
            self.inner.get_domain(id).await
        }
    }

    #[tokio::test]
    async fn test_single_lookup_error_fails_only_that_domain() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let registry = FlakyRegistry {
            inner: verified(&["d1", "d2"]),
            failing: ids(&["d2"]),
        };
        let (coordinator, _store) = coordinator(registry, authority.clone());

        let job = coordinator.activate(ids(&["d1", "d2"]), options(3, true)).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        assert_eq!(job.results[0].status, DomainResultStatus::Success);
        assert_eq!(job.results[1].status, DomainResultStatus::Failed);
        assert!(job.results[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("unavailable")));
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test]
    async fn test_submit_and_poll() {
        let authority = Arc::new(MockAuthority::new(Duration::from_millis(10)));
        let (coordinator, _store) = coordinator(verified(&["d1", "d2"]), authority);

        let id = coordinator.submit(ids(&["d1", "d2"]), options(2, true));
        let submitted = coordinator.job(&id).unwrap();
        assert_eq!(submitted.total, 2);

        let finished = loop {
            let job = coordinator.job(&id).unwrap();
            if job.status.is_terminal() {
                break job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.succeeded(), 2);
        assert!(finished.finished_at.is_some());
    }

    #[test]
    fn test_registry_prunes_finished_jobs() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        let mut done = BatchJob::new(ids(&["d1"]));
        done.status = JobStatus::Completed;
        done.finished_at = Some(Utc::now() - chrono::Duration::hours(2));
        let running = BatchJob::new(ids(&["d2"]));
        let running_id = running.id.clone();
        let done_id = done.id.clone();
        registry.insert(done);
        registry.insert(running);

        assert!(registry.get(&done_id).is_none());
        assert!(registry.get(&running_id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_job_percentage() {
        let job = BatchJob::new(Vec::new());
        assert_eq!(job.percentage(), 100);
        assert!(job.results.is_empty());
    }
}
