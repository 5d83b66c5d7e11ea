//! Self-signed continuity certificates.
//!
//! Used when the authority cannot issue in time. The certificate is a real
//! X.509 certificate, signed by its own key, so TLS terminators can load it
//! like any other.

use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rcgen::{CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, SerialNumber};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

/// Default validity of a fallback certificate
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Fallback generation errors
#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("self-signed generation failed for '{domain}': {message}")]
    Generation { domain: String, message: String },
}

/// PEM material of a generated fallback certificate
#[derive(Debug, Clone)]
pub struct FallbackCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hex-encoded serial number
    pub serial_hex: String,
}

/// Generates self-signed certificates for a single name
#[derive(Debug, Clone)]
pub struct SelfSignedGenerator {
    validity_days: u32,
}

impl SelfSignedGenerator {
    pub fn new(validity_days: u32) -> Self {
        Self { validity_days }
    }

    pub fn validity_days(&self) -> u32 {
        self.validity_days
    }

    /// Generate a key pair and a certificate whose subject and issuer are
    /// both `domain`
    pub fn generate(&self, domain: &str) -> Result<FallbackCertificate, FallbackError> {
        let err = |message: String| FallbackError::Generation {
            domain: domain.to_string(),
            message,
        };

        let not_before = Utc::now();
        let expires_at = not_before + Duration::days(i64::from(self.validity_days));

        let mut params =
            CertificateParams::new(vec![domain.to_string()]).map_err(|e| err(e.to_string()))?;
        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, domain);
        params.distinguished_name = distinguished_name;
        params.is_ca = IsCa::NoCa;
        params.not_before = OffsetDateTime::from(SystemTime::from(not_before));
        params.not_after = OffsetDateTime::from(SystemTime::from(expires_at));

        let serial = random_serial();
        params.serial_number = Some(SerialNumber::from_slice(&serial));

        let key_pair = KeyPair::generate().map_err(|e| err(e.to_string()))?;
        let certificate = params
            .self_signed(&key_pair)
            .map_err(|e| err(e.to_string()))?;

        info!(
            domain = %domain,
            expires = %expires_at,
            "Generated self-signed fallback certificate"
        );

        Ok(FallbackCertificate {
            certificate_pem: certificate.pem(),
            private_key_pem: key_pair.serialize_pem(),
            not_before,
            expires_at,
            serial_hex: hex::encode(serial),
        })
    }
}

impl Default for SelfSignedGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDITY_DAYS)
    }
}

/// 128-bit serial with the sign bit cleared so it encodes as positive
fn random_serial() -> [u8; 16] {
    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    serial[0] &= 0x7f;
    serial[0] |= 0x01;
    serial
}
