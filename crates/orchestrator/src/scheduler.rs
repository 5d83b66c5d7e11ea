//! Renewal sweep scheduler
//!
//! Once a day the sweeper looks for certificates that expire inside the
//! renewal window and renews them one at a time. Renewal is lower urgency
//! than batch activation, so items never run concurrently and each failure
//! is recorded without stopping the sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use certward_common::CertificateProvider;
use certward_config::{DailyTime, RenewalConfig};

use crate::error::ActivationError;
use crate::issuance::IssuancePipeline;
use crate::store::{Certificate, RenewalLog, RenewalLogEntry, StoreError};

/// Sweep errors
#[derive(Debug, Error)]
pub enum SweepError {
    /// Another sweep holds the execution guard
    #[error("a renewal sweep is already running")]
    AlreadyRunning,

    #[error("certificate store error: {0}")]
    Store(#[from] StoreError),
}

/// Limits of one sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub days_before_expiry: u32,
    pub max_renewals_per_run: usize,
    /// Deadline of one authority attempt. An item may take up to
    /// `max_attempts * item_timeout` plus the backoff pauses.
    pub item_timeout: Duration,
    pub item_pause: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub fallback_to_self_signed: bool,
}

impl SweepSettings {
    pub fn from_config(config: &RenewalConfig) -> Self {
        Self {
            days_before_expiry: config.days_before_expiry,
            max_renewals_per_run: config.max_renewals_per_run,
            item_timeout: Duration::from_secs(config.item_timeout_secs),
            item_pause: Duration::from_millis(config.item_pause_ms),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            fallback_to_self_signed: config.fallback_to_self_signed,
        }
    }
}

/// Renews certificates that are about to expire
pub struct RenewalSweeper {
    pipeline: IssuancePipeline,
    settings: SweepSettings,
    /// Held for the duration of a sweep
    guard: tokio::sync::Mutex<()>,
}

impl RenewalSweeper {
    pub fn new(pipeline: IssuancePipeline, settings: SweepSettings) -> Self {
        Self {
            pipeline,
            settings,
            guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Run one sweep and append its renewal log
    ///
    /// Returns [`SweepError::AlreadyRunning`] without doing any work when a
    /// sweep is in progress.
    pub async fn sweep(&self) -> Result<RenewalLog, SweepError> {
        let Ok(_running) = self.guard.try_lock() else {
            warn!("Renewal sweep already running, skipping");
            self.pipeline.metrics().record_sweep("skipped");
            return Err(SweepError::AlreadyRunning);
        };

        let result = self.run_sweep().await;
        match &result {
            Ok(_) => self.pipeline.metrics().record_sweep("completed"),
            Err(e) => {
                error!(error = %e, "Renewal sweep aborted");
                self.pipeline.metrics().record_sweep("failed");
            }
        }
        result
    }

    async fn run_sweep(&self) -> Result<RenewalLog, SweepError> {
        let store = self.pipeline.store();
        let run_at = Utc::now();
        let window = chrono::Duration::days(i64::from(self.settings.days_before_expiry));

        let changed = store.refresh_statuses(run_at, window).await?;
        if changed > 0 {
            debug!(changed = changed, "Refreshed certificate statuses");
        }

        let mut due = store.find_expiring_before(run_at + window, true).await?;
        if due.len() > self.settings.max_renewals_per_run {
            info!(
                due = due.len(),
                limit = self.settings.max_renewals_per_run,
                "More certificates due than allowed per run"
            );
            due.truncate(self.settings.max_renewals_per_run);
        }

        if due.is_empty() {
            info!("No certificates due for renewal");
        } else {
            info!(count = due.len(), "Starting renewal sweep");
        }

        let mut entries = Vec::with_capacity(due.len());
        for (index, certificate) in due.iter().enumerate() {
            entries.push(self.renew_one(certificate).await);

            if index + 1 < due.len() && !self.settings.item_pause.is_zero() {
                tokio::time::sleep(self.settings.item_pause).await;
            }
        }

        let log = RenewalLog::from_entries(run_at, Utc::now(), entries);
        store.append_renewal_log(log.clone()).await?;

        info!(
            processed = log.processed,
            succeeded = log.succeeded,
            failed = log.failed,
            "Renewal sweep finished"
        );
        Ok(log)
    }

    /// Renew one certificate, retrying with exponential backoff
    async fn renew_one(&self, certificate: &Certificate) -> RenewalLogEntry {
        let name = certificate.domain_name.as_str();
        let mut backoff = self.settings.retry_backoff;
        let mut attempts = 0;

        let failure = loop {
            attempts += 1;
            debug!(domain = %name, attempt = attempts, "Renewing certificate");

            let err = match self
                .pipeline
                .request(name, self.settings.item_timeout)
                .await
            {
                Ok(issued) => match self.store_renewal(certificate, issued).await {
                    Ok(renewed) => {
                        info!(domain = %name, attempts = attempts, "Certificate renewed");
                        return RenewalLogEntry {
                            certificate_id: renewed.id,
                            domain_name: name.to_string(),
                            success: true,
                            provider: renewed.provider,
                            expires_at: renewed.expires_at,
                            error: None,
                            attempts,
                        };
                    }
                    // A store failure is not retried against the authority
                    Err(e) => break e,
                },
                Err(e) => e,
            };

            if attempts >= self.settings.max_attempts {
                break err;
            }
            warn!(
                domain = %name,
                attempt = attempts,
                retry_in_secs = backoff.as_secs(),
                error = %err,
                "Renewal attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        };

        self.record_failure(certificate, failure, attempts).await
    }

    async fn store_renewal(
        &self,
        certificate: &Certificate,
        issued: crate::acme::IssuedCertificate,
    ) -> Result<Certificate, ActivationError> {
        let renewed = self
            .pipeline
            .persist_issued(&certificate.domain_name, issued)
            .await?;
        Ok(self
            .pipeline
            .store()
            .record_renewal_attempt(&renewed.id, true, None)
            .await?)
    }

    async fn record_failure(
        &self,
        certificate: &Certificate,
        failure: ActivationError,
        attempts: u32,
    ) -> RenewalLogEntry {
        let name = certificate.domain_name.as_str();
        self.pipeline.metrics().record_failure(failure.kind());
        error!(domain = %name, attempts = attempts, error = %failure, "Certificate renewal failed");

        let mut entry = RenewalLogEntry {
            certificate_id: certificate.id.clone(),
            domain_name: name.to_string(),
            success: false,
            provider: certificate.provider,
            expires_at: certificate.expires_at,
            error: Some(failure.to_string()),
            attempts,
        };

        let expired = !certificate.has_valid_material(Utc::now());
        if self.settings.fallback_to_self_signed && expired && failure.triggers_fallback() {
            match self.pipeline.persist_fallback(name, &failure).await {
                Ok(replacement) => {
                    entry.provider = Some(CertificateProvider::SelfSigned);
                    entry.expires_at = replacement.expires_at;
                    return entry;
                }
                Err(e) => {
                    warn!(domain = %name, error = %e, "Fallback after failed renewal did not succeed");
                }
            }
        }

        if let Err(e) = self
            .pipeline
            .store()
            .record_renewal_attempt(&certificate.id, false, Some(&failure.to_string()))
            .await
        {
            warn!(domain = %name, error = %e, "Failed to record renewal attempt");
        }
        entry
    }
}

impl std::fmt::Debug for RenewalSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalSweeper")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Next occurrence of `at` (UTC) strictly after `now`
pub fn next_fire(now: DateTime<Utc>, at: DailyTime) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(at.hour, at.minute, 0)
        .map(|naive| naive.and_utc());

    match today {
        Some(fire) if fire > now => fire,
        Some(fire) => fire + chrono::Duration::days(1),
        None => now + chrono::Duration::days(1),
    }
}

/// Outcome of the most recent sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub error: Option<String>,
}

/// Scheduler state reported to operators
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub active: bool,
    /// Daily trigger, `HH:MM` UTC
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub config: RenewalConfig,
    pub last_run: Option<LastRun>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the daily sweep task
///
/// Created once per process and passed to whoever needs to control it.
pub struct SchedulerHandle {
    sweeper: Arc<RenewalSweeper>,
    config: RenewalConfig,
    running: Mutex<Option<Running>>,
    last_run: Arc<RwLock<Option<LastRun>>>,
}

impl SchedulerHandle {
    pub fn new(sweeper: Arc<RenewalSweeper>, config: RenewalConfig) -> Self {
        Self {
            sweeper,
            config,
            running: Mutex::new(None),
            last_run: Arc::new(RwLock::new(None)),
        }
    }

    pub fn sweeper(&self) -> &Arc<RenewalSweeper> {
        &self.sweeper
    }

    /// Start the daily trigger; returns `false` if it was already running
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!("Renewal scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(schedule_loop(
            self.sweeper.clone(),
            self.config.schedule,
            cancel.clone(),
            self.last_run.clone(),
        ));
        *running = Some(Running { cancel, task });

        info!(schedule = %self.config.schedule, "Renewal scheduler started");
        true
    }

    /// Stop the daily trigger; returns `false` if it was not running
    ///
    /// A sweep already in progress runs to completion and appends its log
    /// in the background. Use [`shutdown`](Self::shutdown) to wait for it.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(running) => {
                running.cancel.cancel();
                info!("Renewal scheduler stopped");
                true
            }
            None => false,
        }
    }

    /// Stop the daily trigger and wait for an in-progress sweep to finish
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        info!("Renewal scheduler stopping, waiting for the current sweep");
        if let Err(e) = running.task.await {
            warn!(error = %e, "Renewal schedule task ended abnormally");
        }
        info!("Renewal scheduler stopped");
    }

    /// Run a sweep immediately, outside the daily trigger
    pub async fn run_now(&self) -> Result<RenewalLog, SweepError> {
        run_and_record(&self.sweeper, &self.last_run).await
    }

    pub fn is_active(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    pub fn status(&self) -> SchedulerStatus {
        let active = self.is_active();
        SchedulerStatus {
            active,
            schedule: self.config.schedule.to_string(),
            next_run: active.then(|| next_fire(Utc::now(), self.config.schedule)),
            config: self.config.clone(),
            last_run: self.last_run.read().clone(),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("schedule", &self.config.schedule)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

async fn schedule_loop(
    sweeper: Arc<RenewalSweeper>,
    schedule: DailyTime,
    cancel: CancellationToken,
    last_run: Arc<RwLock<Option<LastRun>>>,
) {
    loop {
        let now = Utc::now();
        let next = next_fire(now, schedule);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(next_run = %next, "Next renewal sweep scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        // A started sweep is never cancelled midway
        if let Err(e) = run_and_record(&sweeper, &last_run).await {
            warn!(error = %e, "Scheduled renewal sweep did not run");
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    debug!("Renewal schedule loop exited");
}

async fn run_and_record(
    sweeper: &RenewalSweeper,
    last_run: &RwLock<Option<LastRun>>,
) -> Result<RenewalLog, SweepError> {
    let started_at = Utc::now();
    let result = sweeper.sweep().await;

    let record = match &result {
        Ok(log) => Some(LastRun {
            started_at,
            finished_at: log.finished_at,
            processed: log.processed,
            succeeded: log.succeeded,
            failed: log.failed,
            error: None,
        }),
        Err(SweepError::AlreadyRunning) => None,
        Err(e) => Some(LastRun {
            started_at,
            finished_at: Utc::now(),
            processed: 0,
            succeeded: 0,
            failed: 0,
            error: Some(e.to_string()),
        }),
    };
    if let Some(record) = record {
        *last_run.write() = Some(record);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::SelfSignedGenerator;
    use crate::issuance::testing::{Behavior, MockAuthority};
    use crate::metrics::OrchestratorMetrics;
    use crate::store::{CertificateMaterial, CertificateStore, MemoryCertificateStore};
    use certward_common::CertificateStatus;
    use chrono::TimeZone;

    fn settings() -> SweepSettings {
        SweepSettings {
            item_pause: Duration::ZERO,
            retry_backoff: Duration::from_secs(5),
            ..SweepSettings::from_config(&RenewalConfig::default())
        }
    }

    fn sweeper(
        authority: Arc<MockAuthority>,
        settings: SweepSettings,
    ) -> (RenewalSweeper, Arc<MemoryCertificateStore>) {
        let store = Arc::new(MemoryCertificateStore::new());
        let pipeline = IssuancePipeline::new(
            authority,
            store.clone(),
            SelfSignedGenerator::default(),
            OrchestratorMetrics::new().unwrap(),
        );
        (RenewalSweeper::new(pipeline, settings), store)
    }

    async fn seed(store: &MemoryCertificateStore, name: &str, days: i64) -> Certificate {
        store
            .upsert_active(
                name,
                CertificateMaterial {
                    certificate_pem: format!("cert-{name}"),
                    private_key_pem: format!("key-{name}"),
                    chain_pem: String::new(),
                },
                CertificateProvider::Authority,
                Utc::now() + chrono::Duration::days(days),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_renews_due_certificates_soonest_first() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let (sweeper, store) = sweeper(authority.clone(), settings());

        seed(&store, "ten.example.com", 10).await;
        seed(&store, "forty.example.com", 40).await;
        seed(&store, "five.example.com", 5).await;
        let manual = seed(&store, "manual.example.com", 3).await;
        store.set_auto_renew(&manual.id, false).await.unwrap();

        let log = sweeper.sweep().await.unwrap();

        assert_eq!(log.processed, 2);
        assert_eq!(log.succeeded, 2);
        assert_eq!(
            *authority.order.lock(),
            vec!["five.example.com", "ten.example.com"]
        );

        let renewed = store.find_active("five.example.com").await.unwrap().unwrap();
        assert_eq!(renewed.revision, 2);
        assert!(renewed.renewed_at.is_some());
        assert!(renewed.last_renewal_attempt.is_some());
        assert!(renewed.days_until_expiry(Utc::now()).unwrap() > 80);

        let untouched = store.find_active("manual.example.com").await.unwrap().unwrap();
        assert_eq!(untouched.revision, 1);
        assert_eq!(store.renewal_logs(10).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_keeps_material() {
        let authority = Arc::new(
            MockAuthority::new(Duration::ZERO).with("a.example.com", Behavior::Fail),
        );
        let (sweeper, store) = sweeper(authority.clone(), settings());
        let before = seed(&store, "a.example.com", 10).await;
        seed(&store, "b.example.com", 12).await;

        let log = sweeper.sweep().await.unwrap();

        assert_eq!(log.processed, 2);
        assert_eq!(log.failed, 1);
        assert_eq!(log.entries[0].domain_name, "a.example.com");
        assert!(!log.entries[0].success);
        assert_eq!(log.entries[0].attempts, 2);
        assert!(log.entries[1].success);
        assert_eq!(authority.calls(), 3);

        let after = store.get(&before.id).await.unwrap().unwrap();
        assert_eq!(after.material, before.material);
        assert_eq!(after.expires_at, before.expires_at);
        assert_eq!(after.revision, 1);
        assert!(after.last_renewal_attempt.is_some());
        assert!(after.last_renewal_error.is_some());
        assert_ne!(after.status, CertificateStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_timeout_bounds_each_attempt() {
        let authority = Arc::new(
            MockAuthority::new(Duration::ZERO).with("slow.example.com", Behavior::Hang),
        );
        let (sweeper, store) = sweeper(authority.clone(), settings());
        seed(&store, "slow.example.com", 4).await;

        let started = tokio::time::Instant::now();
        let log = sweeper.sweep().await.unwrap();

        // Two attempts of 300 s plus one 5 s backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(605) && elapsed < Duration::from_secs(606));
        assert_eq!(authority.calls(), 2);
        assert_eq!(log.entries[0].attempts, 2);
        assert!(log.entries[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn test_empty_sweep_still_logs() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let (sweeper, store) = sweeper(authority.clone(), settings());
        seed(&store, "later.example.com", 60).await;

        let log = sweeper.sweep().await.unwrap();

        assert_eq!(log.processed, 0);
        assert_eq!(authority.calls(), 0);
        let logs = store.renewal_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].processed, 0);
    }

    #[tokio::test]
    async fn test_max_renewals_per_run() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let (sweeper, store) = sweeper(
            authority.clone(),
            SweepSettings {
                max_renewals_per_run: 2,
                ..settings()
            },
        );
        for days in [9, 3, 7, 1] {
            seed(&store, &format!("d{days}.example.com"), days).await;
        }

        let log = sweeper.sweep().await.unwrap();

        assert_eq!(log.processed, 2);
        assert_eq!(
            *authority.order.lock(),
            vec!["d1.example.com", "d3.example.com"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_sweeps_are_rejected() {
        let authority = Arc::new(MockAuthority::new(Duration::from_secs(1)));
        let (sweeper, store) = sweeper(authority.clone(), settings());
        seed(&store, "a.example.com", 5).await;

        let (first, second) = tokio::join!(sweeper.sweep(), sweeper.sweep());

        assert!(first.is_ok());
        assert!(matches!(second, Err(SweepError::AlreadyRunning)));
        assert_eq!(authority.calls(), 1);
        assert_eq!(store.renewal_logs(10).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_certificate_falls_back_when_enabled() {
        let authority = Arc::new(
            MockAuthority::new(Duration::ZERO).with("gone.example.com", Behavior::Fail),
        );
        let (sweeper, store) = sweeper(
            authority,
            SweepSettings {
                fallback_to_self_signed: true,
                ..settings()
            },
        );
        seed(&store, "gone.example.com", -1).await;

        let log = sweeper.sweep().await.unwrap();

        assert!(!log.entries[0].success);
        assert_eq!(log.entries[0].provider, Some(CertificateProvider::SelfSigned));
        let row = store.find_active("gone.example.com").await.unwrap().unwrap();
        assert_eq!(row.provider, Some(CertificateProvider::SelfSigned));
        assert_eq!(row.status, CertificateStatus::Active);
        assert!(row.last_renewal_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_certificate_without_fallback_is_failed() {
        let authority = Arc::new(
            MockAuthority::new(Duration::ZERO).with("gone.example.com", Behavior::Fail),
        );
        let (sweeper, store) = sweeper(authority, settings());
        seed(&store, "gone.example.com", -1).await;

        sweeper.sweep().await.unwrap();

        let row = store.find_active("gone.example.com").await.unwrap().unwrap();
        assert_eq!(row.status, CertificateStatus::Failed);
        assert_eq!(row.provider, Some(CertificateProvider::Authority));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let (sweeper, _store) = sweeper(authority, settings());
        let handle = SchedulerHandle::new(Arc::new(sweeper), RenewalConfig::default());

        assert!(!handle.status().active);
        assert!(handle.start());
        assert!(!handle.start());
        let status = handle.status();
        assert!(status.active);
        assert_eq!(status.schedule, "02:00");
        assert!(status.next_run.is_some());

        assert!(handle.stop());
        assert!(!handle.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_running_sweep_finish() {
        let authority = Arc::new(MockAuthority::new(Duration::from_secs(60)));
        let (sweeper, store) = sweeper(authority.clone(), settings());
        let first = seed(&store, "a.example.com", 2).await;
        let second = seed(&store, "b.example.com", 3).await;
        let config = RenewalConfig::default();
        let handle = SchedulerHandle::new(Arc::new(sweeper), config.clone());

        assert!(handle.start());
        let wait = (next_fire(Utc::now(), config.schedule) - Utc::now())
            .to_std()
            .unwrap();
        // First item renewed, second one in flight
        tokio::time::sleep(wait + Duration::from_secs(90)).await;
        assert_eq!(authority.calls(), 2);
        assert!(store.renewal_logs(10).await.unwrap().is_empty());

        handle.shutdown().await;

        assert!(!handle.is_active());
        let logs = store.renewal_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].processed, 2);
        assert_eq!(logs[0].succeeded, 2);
        assert_eq!(store.get(&first.id).await.unwrap().unwrap().revision, 2);
        assert_eq!(store.get(&second.id).await.unwrap().unwrap().revision, 2);
        assert_eq!(handle.status().last_run.unwrap().processed, 2);
    }

    #[tokio::test]
    async fn test_run_now_records_last_run() {
        let authority = Arc::new(MockAuthority::new(Duration::ZERO));
        let (sweeper, store) = sweeper(authority, settings());
        seed(&store, "a.example.com", 2).await;
        let handle = SchedulerHandle::new(Arc::new(sweeper), RenewalConfig::default());

        let log = handle.run_now().await.unwrap();

        let last = handle.status().last_run.unwrap();
        assert_eq!(last.processed, log.processed);
        assert_eq!(last.succeeded, 1);
        assert!(last.error.is_none());
    }

    #[test]
    fn test_next_fire() {
        let at = DailyTime { hour: 2, minute: 0 };

        let before = Utc.with_ymd_and_hms(2026, 3, 10, 1, 30, 0).unwrap();
        assert_eq!(
            next_fire(before, at),
            Utc.with_ymd_and_hms(2026, 3, 10, 2, 0, 0).unwrap()
        );

        let after = Utc.with_ymd_and_hms(2026, 3, 10, 2, 0, 0).unwrap();
        assert_eq!(
            next_fire(after, at),
            Utc.with_ymd_and_hms(2026, 3, 11, 2, 0, 0).unwrap()
        );

        let year_end = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 0).unwrap();
        assert_eq!(
            next_fire(year_end, at),
            Utc.with_ymd_and_hms(2027, 1, 1, 2, 0, 0).unwrap()
        );
    }
}
