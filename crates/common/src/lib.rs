//! Common types for the Certward certificate orchestrator.

pub mod ids;
pub mod types;

pub use ids::{CertificateId, DomainId, JobId, RenewalLogId, StoreId};
pub use types::{
    CertificateProvider, CertificateStatus, DomainResultStatus, JobStatus, VerificationStatus,
};
