//! ACME protocol client
//!
//! Drives one HTTP-01 issuance against the certificate authority:
//! account → order → authorization → challenge → finalize → download.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, KeyPair};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::chain::CertificateChain;
use super::challenge::ChallengeManager;
use super::error::AcmeError;
use super::storage::{AccountStorage, StoredAccount};

/// First delay between order polls
const POLL_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Longest delay between order polls
const POLL_MAX_DELAY: Duration = Duration::from_secs(10);

/// Certificate material returned by a successful issuance
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// PEM of the leaf certificate
    pub certificate_pem: String,
    /// PEM of the trust chain (everything after the leaf)
    pub chain_pem: String,
    /// PEM of the private key generated for the CSR
    pub private_key_pem: String,
    /// Leaf `notAfter`
    pub expires_at: DateTime<Utc>,
}

/// Anything that can issue a certificate for a single domain name
///
/// [`AcmeClient`] is the production implementation; the batch coordinator
/// and the renewal sweeper only depend on this trait.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Run one complete issuance for `domain`
    ///
    /// Any step failure aborts the issuance; a later call starts a fresh
    /// order.
    async fn issue(&self, domain: &str) -> Result<IssuedCertificate, AcmeError>;
}

/// Settings for [`AcmeClient`]
#[derive(Debug, Clone)]
pub struct AcmeClientConfig {
    /// ACME directory URL
    pub directory: String,
    /// Account contact email
    pub contact_email: Option<String>,
    /// Bound on challenge validation plus certificate download
    pub validation_timeout: Duration,
}

/// ACME client backed by `instant-acme`
pub struct AcmeClient {
    config: AcmeClientConfig,
    storage: AccountStorage,
    challenges: ChallengeManager,
    /// Account reused across issuances; the mutex also serializes creation
    account: Mutex<Option<Account>>,
}

impl AcmeClient {
    pub fn new(
        config: AcmeClientConfig,
        storage: AccountStorage,
        challenges: ChallengeManager,
    ) -> Self {
        Self {
            config,
            storage,
            challenges,
            account: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AcmeClientConfig {
        &self.config
    }

    pub fn challenges(&self) -> &ChallengeManager {
        &self.challenges
    }

    /// Get the cached account, restore it from storage, or create it
    async fn account(&self) -> Result<Account, AcmeError> {
        let mut cached = self.account.lock().await;
        if let Some(account) = cached.as_ref() {
            return Ok(account.clone());
        }

        let account = match self.storage.load_credentials_json()? {
            Some(json) => {
                debug!("Restoring ACME account from saved credentials");
                let credentials: AccountCredentials = serde_json::from_str(&json)
                    .map_err(|e| AcmeError::Account(format!("corrupt credentials: {e}")))?;
                Account::from_credentials(credentials)
                    .await
                    .map_err(|e| AcmeError::Account(e.to_string()))?
            }
            None => self.create_account().await?,
        };

        *cached = Some(account.clone());
        Ok(account)
    }

    async fn create_account(&self) -> Result<Account, AcmeError> {
        let email = self
            .config
            .contact_email
            .as_deref()
            .ok_or(AcmeError::MissingContact)?;

        info!(
            email = %email,
            directory = %self.config.directory,
            "Creating new ACME account"
        );

        let contact = format!("mailto:{email}");
        let contact_refs: &[&str] = &[&contact];
        let new_account = NewAccount {
            contact: contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (account, credentials) = Account::create(&new_account, &self.config.directory, None)
            .await
            .map_err(|e| AcmeError::Account(e.to_string()))?;

        let json = serde_json::to_string(&credentials)
            .map_err(|e| AcmeError::Account(format!("cannot serialize credentials: {e}")))?;
        self.storage.save_credentials_json(&json)?;
        self.storage.save_account(&StoredAccount {
            account_url: account.id().to_string(),
            directory: self.config.directory.clone(),
            contact_email: Some(email.to_string()),
            created: Utc::now(),
        })?;

        Ok(account)
    }

    /// Poll the order until every authorization is validated
    async fn wait_for_ready(
        &self,
        order: &mut Order,
        domain: &str,
        deadline: Instant,
    ) -> Result<(), AcmeError> {
        let mut delay = POLL_INITIAL_DELAY;

        loop {
            let state = order.refresh().await.map_err(|e| AcmeError::ChallengeFailed {
                domain: domain.to_string(),
                message: format!("failed to refresh order: {e}"),
            })?;

            debug!(domain = %domain, status = ?state.status, "Order status");

            match state.status {
                OrderStatus::Ready => return Ok(()),
                OrderStatus::Invalid => {
                    let detail = state
                        .error
                        .as_ref()
                        .map(|problem| format!("{problem:?}"))
                        .unwrap_or_else(|| "authorization invalid".to_string());
                    return Err(AcmeError::ChallengeFailed {
                        domain: domain.to_string(),
                        message: detail,
                    });
                }
                OrderStatus::Valid => {
                    return Err(AcmeError::Finalize {
                        domain: domain.to_string(),
                        message: "order was finalized before a CSR was submitted".to_string(),
                    });
                }
                OrderStatus::Pending | OrderStatus::Processing => {}
            }

            if Instant::now() + delay > deadline {
                return Err(AcmeError::ChallengeFailed {
                    domain: domain.to_string(),
                    message: format!(
                        "validation did not complete within {}s",
                        self.config.validation_timeout.as_secs()
                    ),
                });
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_MAX_DELAY);
        }
    }

    /// Poll until the issued certificate bundle is available
    async fn wait_for_certificate(
        &self,
        order: &mut Order,
        domain: &str,
        deadline: Instant,
    ) -> Result<String, AcmeError> {
        let mut delay = POLL_INITIAL_DELAY;

        loop {
            match order.certificate().await {
                Ok(Some(bundle)) => return Ok(bundle),
                Ok(None) => {
                    debug!(domain = %domain, "Certificate not yet available");
                }
                Err(e) => {
                    return Err(AcmeError::Finalize {
                        domain: domain.to_string(),
                        message: e.to_string(),
                    })
                }
            }

            if Instant::now() + delay > deadline {
                return Err(AcmeError::Finalize {
                    domain: domain.to_string(),
                    message: "certificate was not issued before the deadline".to_string(),
                });
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_MAX_DELAY);
        }
    }
}

#[async_trait]
impl CertificateAuthority for AcmeClient {
    async fn issue(&self, domain: &str) -> Result<IssuedCertificate, AcmeError> {
        if domain.is_empty() || domain.contains('*') {
            return Err(AcmeError::UnsupportedIdentifier(domain.to_string()));
        }

        let start = Instant::now();
        let deadline = start + self.config.validation_timeout;
        info!(domain = %domain, "Starting ACME certificate issuance");

        let account = self.account().await?;

        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation {
                domain: domain.to_string(),
                message: e.to_string(),
            })?;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Authorization {
                domain: domain.to_string(),
                message: e.to_string(),
            })?;

        // Held until the certificate is downloaded; dropping withdraws the
        // tokens, also when this future is cancelled
        let mut published = Vec::with_capacity(authorizations.len());

        for auth in &authorizations {
            if auth.status == AuthorizationStatus::Valid {
                debug!(domain = %domain, "Authorization already valid");
                continue;
            }

            let challenge = auth
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| AcmeError::ChallengeUnavailable {
                    domain: domain.to_string(),
                    offered: auth
                        .challenges
                        .iter()
                        .map(|c| format!("{:?}", c.r#type))
                        .collect::<Vec<_>>()
                        .join(", "),
                })?;

            let key_authorization = order.key_authorization(challenge);
            let guard = self
                .challenges
                .publish(domain, &challenge.token, key_authorization.as_str())
                .map_err(|e| AcmeError::ChallengePublish {
                    domain: domain.to_string(),
                    message: e.to_string(),
                })?;
            published.push(guard);

            order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| AcmeError::ChallengeFailed {
                    domain: domain.to_string(),
                    message: format!("authority rejected challenge readiness: {e}"),
                })?;

            debug!(domain = %domain, token = %challenge.token, "Challenge marked ready");
        }

        self.wait_for_ready(&mut order, domain, deadline).await?;

        let key_pair = KeyPair::generate().map_err(|e| AcmeError::Csr {
            domain: domain.to_string(),
            message: e.to_string(),
        })?;
        let csr = CertificateParams::new(vec![domain.to_string()])
            .and_then(|params| params.serialize_request(&key_pair))
            .map_err(|e| AcmeError::Csr {
                domain: domain.to_string(),
                message: e.to_string(),
            })?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| AcmeError::Finalize {
                domain: domain.to_string(),
                message: e.to_string(),
            })?;

        let bundle = self.wait_for_certificate(&mut order, domain, deadline).await?;
        drop(published);

        let chain = CertificateChain::parse(&bundle)?;
        let expires_at = chain.leaf().not_after()?;
        if chain.intermediates().is_empty() {
            warn!(domain = %domain, "Authority returned a leaf without a chain");
        }

        info!(
            domain = %domain,
            expires = %expires_at,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Certificate issued by authority"
        );

        Ok(IssuedCertificate {
            certificate_pem: chain.leaf_pem(),
            chain_pem: chain.chain_pem(),
            private_key_pem: key_pair.serialize_pem(),
            expires_at,
        })
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory", &self.config.directory)
            .field("contact_email", &self.config.contact_email)
            .field("validation_timeout", &self.config.validation_timeout)
            .finish()
    }
}
