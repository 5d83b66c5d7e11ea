//! Prometheus metrics
//!
//! Exposed as text at `GET /metrics` on the challenge listener.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

use certward_common::{CertificateProvider, JobStatus};

/// Metrics collection for the orchestrator
#[derive(Clone)]
pub struct OrchestratorMetrics {
    registry: Registry,
    /// Certificates persisted, by provider
    pub issuances_total: CounterVec,
    /// Failed activations and renewals, by error kind
    pub failures_total: CounterVec,
    /// Authority round-trip time, by outcome
    pub issuance_duration_seconds: HistogramVec,
    /// Finished batch jobs, by final status
    pub batch_jobs_total: CounterVec,
    /// Sweep runs, by outcome
    pub sweeps_total: CounterVec,
    /// Challenge tokens currently published
    pub pending_challenges: IntGauge,
}

impl OrchestratorMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let issuances_total = CounterVec::new(
            Opts::new("certward_issuances_total", "Certificates persisted by provider"),
            &["provider"],
        )?;
        let failures_total = CounterVec::new(
            Opts::new(
                "certward_failures_total",
                "Failed activations and renewals by error kind",
            ),
            &["kind"],
        )?;
        let issuance_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "certward_issuance_duration_seconds",
                "Certificate authority round-trip time",
            )
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["outcome"],
        )?;
        let batch_jobs_total = CounterVec::new(
            Opts::new("certward_batch_jobs_total", "Finished batch jobs by status"),
            &["status"],
        )?;
        let sweeps_total = CounterVec::new(
            Opts::new("certward_sweeps_total", "Renewal sweep runs by outcome"),
            &["outcome"],
        )?;
        let pending_challenges = IntGauge::new(
            "certward_pending_challenges",
            "HTTP-01 challenge tokens currently published",
        )?;

        registry.register(Box::new(issuances_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(issuance_duration_seconds.clone()))?;
        registry.register(Box::new(batch_jobs_total.clone()))?;
        registry.register(Box::new(sweeps_total.clone()))?;
        registry.register(Box::new(pending_challenges.clone()))?;

        Ok(Self {
            registry,
            issuances_total,
            failures_total,
            issuance_duration_seconds,
            batch_jobs_total,
            sweeps_total,
            pending_challenges,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn record_issuance(&self, provider: CertificateProvider) {
        self.issuances_total
            .with_label_values(&[provider.as_str()])
            .inc();
    }

    pub fn record_failure(&self, kind: &str) {
        self.failures_total.with_label_values(&[kind]).inc();
    }

    pub fn observe_authority(&self, success: bool, seconds: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.issuance_duration_seconds
            .with_label_values(&[outcome])
            .observe(seconds);
    }

    pub fn record_batch_job(&self, status: JobStatus) {
        self.batch_jobs_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn record_sweep(&self, outcome: &str) {
        self.sweeps_total.with_label_values(&[outcome]).inc();
    }
}

impl std::fmt::Debug for OrchestratorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_series() {
        let metrics = OrchestratorMetrics::new().unwrap();
        metrics.record_issuance(CertificateProvider::SelfSigned);
        metrics.record_failure("authority_timeout");
        metrics.record_batch_job(JobStatus::Completed);
        metrics.pending_challenges.set(2);

        let text = metrics.encode().unwrap();
        assert!(text.contains("certward_issuances_total{provider=\"self_signed\"} 1"));
        assert!(text.contains("certward_failures_total{kind=\"authority_timeout\"} 1"));
        assert!(text.contains("certward_batch_jobs_total{status=\"completed\"} 1"));
        assert!(text.contains("certward_pending_challenges 2"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = OrchestratorMetrics::new().unwrap();
        let b = OrchestratorMetrics::new().unwrap();
        a.record_sweep("completed");
        assert!(!b.encode().unwrap().contains("certward_sweeps_total{"));
    }
}
