//! Configuration loading and validation for Certward.
//!
//! Configuration is written in KDL:
//!
//! ```kdl
//! acme {
//!     email "ops@example.com"
//!     staging #true
//!     host-prefix "checkout"
//! }
//!
//! storage {
//!     path "/var/lib/certward"
//! }
//!
//! batch {
//!     timeout-ms 60000
//!     max-concurrent 3
//!     fallback-to-self-signed #true
//! }
//!
//! renewal {
//!     schedule "02:00"
//!     days-before-expiry 30
//!     max-renewals-per-run 10
//! }
//!
//! domains {
//!     domain "dom-1" name="shop.example.com" status="verified" store="store-1"
//! }
//! ```
//!
//! Every block is optional; missing values fall back to the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::{Validate, ValidationError};

use certward_common::VerificationStatus;

mod kdl;
pub mod validate;

pub use validate::{lint_config, ValidationResult, ValidationWarning};

/// Let's Encrypt production directory
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

// ============================================================================
// Root configuration
// ============================================================================

/// Root configuration for the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub acme: AcmeConfig,
    pub storage: StorageConfig,
    pub challenge: ChallengeConfig,
    #[validate(nested)]
    pub batch: BatchConfig,
    #[validate(nested)]
    pub renewal: RenewalConfig,
    #[validate(nested)]
    pub fallback: FallbackConfig,
    /// Statically registered domains (seed for the built-in registry)
    pub domains: Vec<DomainEntry>,
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let config = Self::from_kdl(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

        info!(
            path = %path.display(),
            domains = config.domains.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from KDL source
    pub fn from_kdl(content: &str) -> Result<Self> {
        let config = kdl::parse_config(content)?;
        debug!(directory = %config.acme.directory_url(), "Parsed configuration");
        Ok(config)
    }

    /// Validate value ranges and cross-field constraints
    pub fn validate_all(&self) -> Result<()> {
        self.validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

        let mut seen = std::collections::HashSet::new();
        for domain in &self.domains {
            if !seen.insert(domain.id.as_str()) {
                anyhow::bail!("duplicate domain id '{}'", domain.id);
            }
        }

        Ok(())
    }
}

// ============================================================================
// ACME
// ============================================================================

/// Certificate authority settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// Account contact email (required to create a new account)
    #[validate(email)]
    pub email: Option<String>,
    /// Explicit directory URL; overrides `staging`
    pub directory: Option<String>,
    /// Use the Let's Encrypt staging directory
    pub staging: bool,
    /// Upper bound on challenge validation and certificate download
    #[validate(range(min = 10, max = 900))]
    pub validation_timeout_secs: u64,
    /// Host label prepended to registry domain names (`checkout` →
    /// `checkout.example.com`). `None` certifies the bare name.
    pub host_prefix: Option<String>,
}

impl AcmeConfig {
    /// The directory URL the client should talk to
    pub fn directory_url(&self) -> &str {
        match &self.directory {
            Some(url) => url,
            None if self.staging => LETS_ENCRYPT_STAGING,
            None => LETS_ENCRYPT_PRODUCTION,
        }
    }

    /// Name the certificate covers for a registry domain
    pub fn certificate_name(&self, domain: &str) -> String {
        match self.host_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}.{domain}"),
            _ => domain.to_string(),
        }
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            email: None,
            directory: None,
            staging: false,
            validation_timeout_secs: default_validation_timeout(),
            host_prefix: Some(default_host_prefix()),
        }
    }
}

pub(crate) fn default_validation_timeout() -> u64 {
    120
}
pub(crate) fn default_host_prefix() -> String {
    "checkout".to_string()
}

// ============================================================================
// Storage and challenge serving
// ============================================================================

/// Persistent storage for certificates, account credentials and audit logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

pub(crate) fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/certward")
}

/// HTTP-01 challenge serving
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    /// Address of the plain-HTTP challenge listener
    pub listen: String,
    /// Optional webroot; when set, each token is also written to
    /// `<webroot>/.well-known/acme-challenge/<token>` for an external server
    pub webroot: Option<PathBuf>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            listen: default_challenge_listen(),
            webroot: None,
        }
    }
}

pub(crate) fn default_challenge_listen() -> String {
    "0.0.0.0:80".to_string()
}

// ============================================================================
// Batch activation
// ============================================================================

/// Defaults for batch activation requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BatchConfig {
    /// Per-domain authority deadline
    #[validate(range(min = 1000, max = 900_000))]
    pub timeout_ms: u64,
    #[validate(range(min = 1, max = 50))]
    pub max_concurrent: usize,
    pub fallback_to_self_signed: bool,
    /// Pause between chunks
    #[validate(range(max = 60_000))]
    pub chunk_pause_ms: u64,
    /// Certificates with more than this many days left are left alone
    #[validate(range(min = 1, max = 60))]
    pub fresh_threshold_days: u32,
    /// How long finished jobs stay pollable
    pub job_retention_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_batch_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            fallback_to_self_signed: true,
            chunk_pause_ms: default_chunk_pause_ms(),
            fresh_threshold_days: default_fresh_threshold_days(),
            job_retention_secs: default_job_retention_secs(),
        }
    }
}

pub(crate) fn default_batch_timeout_ms() -> u64 {
    60_000
}
pub(crate) fn default_max_concurrent() -> usize {
    3
}
pub(crate) fn default_chunk_pause_ms() -> u64 {
    2_000
}
pub(crate) fn default_fresh_threshold_days() -> u32 {
    7
}
pub(crate) fn default_job_retention_secs() -> u64 {
    3_600
}

// ============================================================================
// Renewal sweep
// ============================================================================

/// Renewal sweep scheduling and limits
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RenewalConfig {
    /// Start the scheduler with the daemon
    pub enabled: bool,
    /// Daily UTC trigger time
    pub schedule: DailyTime,
    #[validate(range(min = 1, max = 90))]
    pub days_before_expiry: u32,
    #[validate(range(min = 1, max = 1000))]
    pub max_renewals_per_run: usize,
    #[validate(range(min = 10, max = 3600))]
    pub item_timeout_secs: u64,
    #[validate(range(max = 60_000))]
    pub item_pause_ms: u64,
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    pub retry_backoff_secs: u64,
    /// Replace expired material with a self-signed certificate when the
    /// authority cannot renew it
    pub fallback_to_self_signed: bool,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: DailyTime::default(),
            days_before_expiry: default_days_before_expiry(),
            max_renewals_per_run: default_max_renewals_per_run(),
            item_timeout_secs: default_item_timeout_secs(),
            item_pause_ms: default_item_pause_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
            fallback_to_self_signed: false,
        }
    }
}

pub(crate) fn default_days_before_expiry() -> u32 {
    30
}
pub(crate) fn default_max_renewals_per_run() -> usize {
    10
}
pub(crate) fn default_item_timeout_secs() -> u64 {
    300
}
pub(crate) fn default_item_pause_ms() -> u64 {
    1_000
}
pub(crate) fn default_max_attempts() -> u32 {
    2
}
pub(crate) fn default_retry_backoff_secs() -> u64 {
    5
}

/// Time of day (UTC) for the daily sweep trigger, written `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTime {
    pub hour: u32,
    pub minute: u32,
}

impl Default for DailyTime {
    fn default() -> Self {
        Self { hour: 2, minute: 0 }
    }
}

impl FromStr for DailyTime {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (hour, minute) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ValidationError::new("schedule_format"))?;
        let hour: u32 = hour
            .parse()
            .map_err(|_| ValidationError::new("schedule_hour"))?;
        let minute: u32 = minute
            .parse()
            .map_err(|_| ValidationError::new("schedule_minute"))?;
        if hour > 23 {
            return Err(ValidationError::new("schedule_hour"));
        }
        if minute > 59 {
            return Err(ValidationError::new("schedule_minute"));
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for DailyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

// ============================================================================
// Fallback and domains
// ============================================================================

/// Self-signed continuity certificates
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FallbackConfig {
    #[validate(range(min = 1, max = 3650))]
    pub validity_days: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            validity_days: default_fallback_validity_days(),
        }
    }
}

pub(crate) fn default_fallback_validity_days() -> u32 {
    365
}

/// A statically registered domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEntry {
    pub id: String,
    pub name: String,
    pub status: VerificationStatus,
    pub store: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.batch.max_concurrent, 3);
        assert_eq!(config.batch.timeout_ms, 60_000);
        assert!(config.batch.fallback_to_self_signed);
        assert_eq!(config.renewal.days_before_expiry, 30);
        assert_eq!(config.renewal.max_renewals_per_run, 10);
        assert_eq!(config.renewal.item_timeout_secs, 300);
        assert_eq!(config.fallback.validity_days, 365);
        assert_eq!(config.acme.directory_url(), LETS_ENCRYPT_PRODUCTION);
        assert!(config.validate_all().is_ok());
    }

    #[test]
    fn test_directory_selection() {
        let mut acme = AcmeConfig {
            staging: true,
            ..Default::default()
        };
        assert_eq!(acme.directory_url(), LETS_ENCRYPT_STAGING);

        acme.directory = Some("https://localhost:14000/dir".to_string());
        assert_eq!(acme.directory_url(), "https://localhost:14000/dir");
    }

    #[test]
    fn test_certificate_name() {
        let mut acme = AcmeConfig::default();
        assert_eq!(acme.certificate_name("shop.io"), "checkout.shop.io");

        acme.host_prefix = None;
        assert_eq!(acme.certificate_name("shop.io"), "shop.io");
    }

    #[test]
    fn test_daily_time_parsing() {
        assert_eq!(
            "03:15".parse::<DailyTime>().unwrap(),
            DailyTime { hour: 3, minute: 15 }
        );
        assert!("24:00".parse::<DailyTime>().is_err());
        assert!("12:60".parse::<DailyTime>().is_err());
        assert!("noon".parse::<DailyTime>().is_err());
        assert_eq!(DailyTime { hour: 7, minute: 5 }.to_string(), "07:05");
    }

    #[test]
    fn test_range_validation() {
        let mut config = Config::default();
        config.batch.max_concurrent = 0;
        assert!(config.validate_all().is_err());

        let mut config = Config::default();
        config.renewal.days_before_expiry = 365;
        assert!(config.validate_all().is_err());
    }

    #[test]
    fn test_duplicate_domain_ids_rejected() {
        let entry = DomainEntry {
            id: "d1".to_string(),
            name: "a.example.com".to_string(),
            status: VerificationStatus::Verified,
            store: None,
        };
        let config = Config {
            domains: vec![entry.clone(), entry],
            ..Default::default()
        };
        assert!(config.validate_all().is_err());
    }
}
