//! Typed certificate chains.
//!
//! The authority returns the issued certificate as a PEM bundle. The first
//! `CERTIFICATE` block is always the leaf; every following block is the
//! trust chain, in the order the authority sent it.

use chrono::{DateTime, Utc};
use pem::{EncodeConfig, LineEnding, Pem};

use super::error::AcmeError;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// One DER-encoded certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBlock {
    der: Vec<u8>,
}

impl CertificateBlock {
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding with LF line endings
    pub fn to_pem(&self) -> String {
        let block = Pem::new(CERTIFICATE_TAG, self.der.clone());
        pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
    }

    /// Expiry (`notAfter`) of this certificate
    pub fn not_after(&self) -> Result<DateTime<Utc>, AcmeError> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| AcmeError::InvalidChain(format!("unparseable certificate: {e}")))?;

        DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| AcmeError::InvalidChain("notAfter out of range".to_string()))
    }
}

/// Leaf certificate plus its trust chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    leaf: CertificateBlock,
    intermediates: Vec<CertificateBlock>,
}

impl CertificateChain {
    /// Parse a PEM bundle; blocks other than `CERTIFICATE` are ignored
    pub fn parse(bundle: &str) -> Result<Self, AcmeError> {
        let blocks = pem::parse_many(bundle)
            .map_err(|e| AcmeError::InvalidChain(format!("malformed PEM: {e}")))?;

        let mut certificates = blocks
            .into_iter()
            .filter(|block| block.tag() == CERTIFICATE_TAG)
            .map(|block| CertificateBlock {
                der: block.into_contents(),
            });

        let leaf = certificates
            .next()
            .ok_or_else(|| AcmeError::InvalidChain("no certificate blocks".to_string()))?;

        Ok(Self {
            leaf,
            intermediates: certificates.collect(),
        })
    }

    pub fn leaf(&self) -> &CertificateBlock {
        &self.leaf
    }

    pub fn intermediates(&self) -> &[CertificateBlock] {
        &self.intermediates
    }

    /// Number of certificates including the leaf
    pub fn len(&self) -> usize {
        1 + self.intermediates.len()
    }

    /// Always false; a chain has at least its leaf
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn leaf_pem(&self) -> String {
        self.leaf.to_pem()
    }

    /// Concatenated PEM of everything after the leaf
    pub fn chain_pem(&self) -> String {
        self.intermediates
            .iter()
            .map(CertificateBlock::to_pem)
            .collect()
    }
}
