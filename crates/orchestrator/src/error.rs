//! Orchestration error taxonomy.
//!
//! Every per-domain and per-certificate failure is mapped onto
//! [`ActivationError`] before it is recorded in a batch result, a renewal
//! log entry or `last_renewal_error`.

use std::time::Duration;

use thiserror::Error;

use certward_common::DomainId;

use crate::acme::{AcmeError, StorageError};
use crate::fallback::FallbackError;
use crate::registry::RegistryError;
use crate::store::StoreError;

/// Errors from activating or renewing a single certificate
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("domain '{0}' not found")]
    DomainNotFound(DomainId),

    /// Ownership not verified; never retried
    #[error("domain '{0}' is not verified")]
    DomainNotVerified(DomainId),

    #[error("challenge unavailable: {0}")]
    ChallengeUnavailable(String),

    #[error("challenge failed: {0}")]
    ChallengeFailed(String),

    #[error("certificate authority timed out after {}s", .0.as_secs_f64())]
    AuthorityTimeout(Duration),

    /// Any other authority-side failure
    #[error("certificate authority error: {0}")]
    Authority(String),

    /// No further fallback exists
    #[error("fallback generation failed: {0}")]
    FallbackGeneration(#[from] FallbackError),

    #[error("certificate store error: {0}")]
    StorePersistence(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("certificate '{0}' not found")]
    CertificateNotFound(String),
}

impl ActivationError {
    /// Whether the self-signed fallback may replace the authority result
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::ChallengeUnavailable(_)
                | Self::ChallengeFailed(_)
                | Self::AuthorityTimeout(_)
                | Self::Authority(_)
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DomainNotFound(_) => "domain_not_found",
            Self::DomainNotVerified(_) => "domain_not_verified",
            Self::ChallengeUnavailable(_) => "challenge_unavailable",
            Self::ChallengeFailed(_) => "challenge_failed",
            Self::AuthorityTimeout(_) => "authority_timeout",
            Self::Authority(_) => "authority",
            Self::FallbackGeneration(_) => "fallback_generation",
            Self::StorePersistence(_) => "store_persistence",
            Self::Registry(_) => "registry",
            Self::CertificateNotFound(_) => "certificate_not_found",
        }
    }
}

impl From<AcmeError> for ActivationError {
    fn from(err: AcmeError) -> Self {
        match err {
            AcmeError::ChallengeUnavailable { .. } => Self::ChallengeUnavailable(err.to_string()),
            AcmeError::ChallengePublish { .. } | AcmeError::ChallengeFailed { .. } => {
                Self::ChallengeFailed(err.to_string())
            }
            other => Self::Authority(other.to_string()),
        }
    }
}

/// Errors assembling an [`Orchestrator`](crate::Orchestrator) from configuration
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to open certificate store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to open account storage: {0}")]
    Account(#[from] StorageError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_errors_trigger_fallback() {
        let challenge: ActivationError = AcmeError::ChallengeFailed {
            domain: "a.example.com".to_string(),
            message: "invalid response".to_string(),
        }
        .into();
        assert!(matches!(challenge, ActivationError::ChallengeFailed(_)));
        assert!(challenge.triggers_fallback());

        let unavailable: ActivationError = AcmeError::ChallengeUnavailable {
            domain: "a.example.com".to_string(),
            offered: "Dns01".to_string(),
        }
        .into();
        assert!(matches!(unavailable, ActivationError::ChallengeUnavailable(_)));

        let account: ActivationError = AcmeError::MissingContact.into();
        assert!(matches!(account, ActivationError::Authority(_)));
        assert!(account.triggers_fallback());

        assert!(ActivationError::AuthorityTimeout(Duration::from_secs(60)).triggers_fallback());
    }

    #[test]
    fn test_local_errors_do_not_trigger_fallback() {
        assert!(!ActivationError::DomainNotVerified(DomainId::from("d")).triggers_fallback());
        assert!(!ActivationError::DomainNotFound(DomainId::from("d")).triggers_fallback());
        assert!(!ActivationError::StorePersistence(StoreError::NotFound("x".into()))
            .triggers_fallback());
    }

    #[test]
    fn test_timeout_message() {
        let err = ActivationError::AuthorityTimeout(Duration::from_millis(60_000));
        assert_eq!(err.to_string(), "certificate authority timed out after 60s");
        assert_eq!(err.kind(), "authority_timeout");
    }
}
