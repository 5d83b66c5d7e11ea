//! ACME certificate issuance
//!
//! Issues domain-validated certificates from Let's Encrypt and compatible
//! authorities over HTTP-01.
//!
//! # Components
//!
//! - [`AcmeClient`] - Wrapper around `instant-acme` driving one issuance
//! - [`AccountStorage`] - Persistent ACME account credentials
//! - [`ChallengeManager`] - Pending HTTP-01 tokens, optionally mirrored to a webroot
//! - [`ChallengeServer`] - Plain-HTTP listener answering the authority's probes
//! - [`CertificateChain`] - PEM bundle splitting and expiry extraction
//!
//! # Challenge Flow
//!
//! 1. [`AcmeClient`] creates a new order for a single domain name
//! 2. The authority offers an HTTP-01 challenge token
//! 3. [`ChallengeManager`] publishes the token and key authorization
//! 4. The authority requests `/.well-known/acme-challenge/<token>`
//! 5. [`ChallengeServer`] answers with the key authorization
//! 6. [`AcmeClient`] finalizes with a fresh key and downloads the chain
//! 7. The challenge is withdrawn on every exit path

mod chain;
mod challenge;
mod client;
mod error;
mod server;
mod storage;

pub use chain::CertificateChain;
pub use challenge::{ChallengeGuard, ChallengeManager, ACME_CHALLENGE_PREFIX};
pub use client::{AcmeClient, AcmeClientConfig, CertificateAuthority, IssuedCertificate};
pub use error::{AcmeError, StorageError};
pub use server::ChallengeServer;
pub use storage::{AccountStorage, StoredAccount};
