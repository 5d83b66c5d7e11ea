//! Error types for the ACME protocol adapter.

use thiserror::Error;

/// Errors raised while talking to the certificate authority
#[derive(Debug, Error)]
pub enum AcmeError {
    /// No contact email configured and no stored account to reuse
    #[error("ACME contact email is required to create a new account")]
    MissingContact,

    /// Account creation or restoration failed
    #[error("ACME account error: {0}")]
    Account(String),

    /// Only single, non-wildcard DNS names are ordered
    #[error("unsupported identifier '{0}' (wildcards are not supported)")]
    UnsupportedIdentifier(String),

    /// Order creation failed
    #[error("failed to create order for '{domain}': {message}")]
    OrderCreation { domain: String, message: String },

    /// Authorizations could not be fetched
    #[error("failed to fetch authorizations for '{domain}': {message}")]
    Authorization { domain: String, message: String },

    /// The authority did not offer an HTTP-01 challenge
    #[error("no HTTP-01 challenge offered for '{domain}' (offered: {offered})")]
    ChallengeUnavailable { domain: String, offered: String },

    /// The challenge token could not be published
    #[error("failed to publish challenge for '{domain}': {message}")]
    ChallengePublish { domain: String, message: String },

    /// Validation failed or never completed
    #[error("challenge failed for '{domain}': {message}")]
    ChallengeFailed { domain: String, message: String },

    /// Key pair or CSR generation failed
    #[error("failed to build signing request for '{domain}': {message}")]
    Csr { domain: String, message: String },

    /// Order finalization or certificate download failed
    #[error("failed to finalize order for '{domain}': {message}")]
    Finalize { domain: String, message: String },

    /// The returned chain did not contain a usable leaf certificate
    #[error("invalid certificate chain: {0}")]
    InvalidChain(String),

    /// Account credential persistence failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised by the account credential storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
