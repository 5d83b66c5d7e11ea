//! Type-safe identifier newtypes for Certward.
//!
//! These types keep identifiers owned by external collaborators (domains,
//! stores) apart from identifiers minted by the orchestrator itself
//! (certificates, batch jobs, renewal logs).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Domain identifier.
///
/// Owned by the domain registry; the orchestrator only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(String);

impl DomainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Store identifier of the shop that owns a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(String);

impl StoreId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates a uuid-backed identifier type minted by the orchestrator.
macro_rules! generated_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Create from an existing string
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

generated_id!(
    /// Certificate record identifier.
    ///
    /// Stable across renewals: a renewal replaces material in place and
    /// keeps the identifier.
    CertificateId
);

generated_id!(
    /// Batch activation job identifier.
    JobId
);

generated_id!(
    /// Renewal sweep audit record identifier.
    RenewalLogId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let id1 = CertificateId::new();
        let id2 = CertificateId::new();
        assert_ne!(id1, id2);

        let job = JobId::from_string("job-1");
        assert_eq!(job.as_str(), "job-1");
        assert_eq!(job.to_string(), "job-1");
    }

    #[test]
    fn test_domain_id() {
        let id = DomainId::new("dom-42");
        assert_eq!(id.as_str(), "dom-42");
        assert_eq!(id, DomainId::from("dom-42"));
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = DomainId::new("dom-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"dom-7\"");

        let parsed: CertificateId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed.as_str(), "abc");
    }
}
