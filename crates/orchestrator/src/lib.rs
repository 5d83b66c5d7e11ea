//! Certward Orchestrator Library
//!
//! Issues, activates and renews TLS certificates for customer domains
//! through an ACME certificate authority, falling back to locally signed
//! certificates when the authority cannot be reached.
//!
//! - **Batch activation**: chunked, bounded concurrency with per-domain timeouts
//! - **Renewal sweep**: daily, sequential, with retries and an audit log
//! - **Manual renewal**: one synchronous cycle for a certificate or domain
//! - **Challenge serving**: plain-HTTP listener for HTTP-01 probes
//!
//! # Example
//!
//! ```ignore
//! use certward_config::Config;
//! use certward_orchestrator::{BatchOptions, Orchestrator};
//!
//! let config = Config::from_file("certward.kdl")?;
//! let orchestrator = Orchestrator::from_config(config)?;
//! let job_id = orchestrator.submit_batch(vec!["dom-1".into()], BatchOptions::default());
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod app;
pub mod batch;
pub mod error;
pub mod fallback;
pub mod issuance;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod store;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Facade
pub use app::{Orchestrator, RenewOptions, RenewTarget};

// Errors
pub use error::{ActivationError, SetupError};

// Batch activation
pub use batch::{BatchCoordinator, BatchJob, BatchOptions, DomainResult, JobRegistry};

// Renewal
pub use scheduler::{
    LastRun, RenewalSweeper, SchedulerHandle, SchedulerStatus, SweepError, SweepSettings,
};

// Issuance
pub use fallback::{FallbackCertificate, FallbackError, SelfSignedGenerator};
pub use issuance::IssuancePipeline;

// Domains and storage
pub use registry::{Domain, DomainRegistry, RegistryError, StaticDomainRegistry};
pub use store::{
    Certificate, CertificateMaterial, CertificateRevision, CertificateStore,
    FileCertificateStore, MemoryCertificateStore, RenewalLog, RenewalLogEntry, StoreError,
};

// Reporting
pub use metrics::OrchestratorMetrics;
pub use status::{BatchProgress, CertificateStatusView, CertificateSummary};
