//! HTTP-01 ACME challenge management
//!
//! Manages pending ACME HTTP-01 challenges for serving via
//! `/.well-known/acme-challenge/<token>`, either from the built-in
//! challenge listener or from files written into a shared webroot.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace, warn};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Webroot-relative directory for challenge artifacts
const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

#[derive(Debug, Clone)]
struct PendingChallenge {
    domain: String,
    key_authorization: String,
}

/// Manages pending ACME HTTP-01 challenges
///
/// When the ACME server needs to validate domain ownership, it requests
/// a specific URL path. This manager stores the token -> key authorization
/// mapping so the challenge listener can serve the correct response. With a
/// webroot configured, every token is additionally written to disk so an
/// external web server can serve it.
///
/// # Thread Safety
///
/// Uses `DashMap` for lock-free concurrent access. Each domain activation
/// publishes under its own token, so concurrent activations never collide
/// and removing one token never touches another.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    /// Map of challenge token -> pending challenge
    challenges: Arc<DashMap<String, PendingChallenge>>,
    /// Optional directory artifacts are mirrored into
    webroot: Option<PathBuf>,
}

impl ChallengeManager {
    /// Create a new in-memory challenge manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a challenge manager that also mirrors tokens into `webroot`
    pub fn with_webroot(webroot: impl Into<PathBuf>) -> Self {
        Self {
            challenges: Arc::new(DashMap::new()),
            webroot: Some(webroot.into()),
        }
    }

    /// Publish a challenge and return a guard that withdraws it on drop
    ///
    /// The guard makes cleanup happen on every exit path, including when the
    /// issuance future is dropped by a timeout.
    pub fn publish(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> io::Result<ChallengeGuard> {
        self.add_challenge(domain, token, key_authorization)?;
        Ok(ChallengeGuard {
            manager: self.clone(),
            token: token.to_string(),
        })
    }

    /// Register a pending challenge
    ///
    /// # Arguments
    ///
    /// * `domain` - Domain being validated (for logging and bulk cleanup)
    /// * `token` - The challenge token from the ACME server
    /// * `key_authorization` - The response to return (token + account key thumbprint)
    pub fn add_challenge(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> io::Result<()> {
        if !is_valid_token(token) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid challenge token '{token}'"),
            ));
        }

        if let Some(path) = self.artifact_path(token) {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, key_authorization)?;
            trace!(path = %path.display(), "Wrote challenge artifact");
        }

        debug!(domain = %domain, token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges.insert(
            token.to_string(),
            PendingChallenge {
                domain: domain.to_string(),
                key_authorization: key_authorization.to_string(),
            },
        );
        Ok(())
    }

    /// Remove a completed or abandoned challenge
    ///
    /// Best-effort: a failure to delete the artifact file is logged and
    /// otherwise ignored.
    pub fn remove_challenge(&self, token: &str) {
        if let Some((_, pending)) = self.challenges.remove(token) {
            debug!(domain = %pending.domain, token = %token, "Removed ACME challenge");
        }

        if let Some(path) = self.artifact_path(token) {
            match fs::remove_file(&path) {
                Ok(()) => trace!(path = %path.display(), "Removed challenge artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove challenge artifact"
                ),
            }
        }
    }

    /// Key authorization published under `token`
    pub fn get_response(&self, token: &str) -> Option<String> {
        let pending = self.challenges.get(token)?;
        trace!(domain = %pending.domain, token = %token, "Challenge lookup hit");
        Some(pending.key_authorization.clone())
    }

    /// Token part of a challenge request path
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    /// Get the number of pending challenges
    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }

    /// Withdraw every pending challenge (daemon shutdown)
    pub fn clear(&self) {
        let tokens: Vec<String> = self.challenges.iter().map(|e| e.key().clone()).collect();
        let count = tokens.len();
        for token in tokens {
            self.remove_challenge(&token);
        }
        if count > 0 {
            debug!(cleared = count, "Cleared all pending ACME challenges");
        }
    }

    fn artifact_path(&self, token: &str) -> Option<PathBuf> {
        self.webroot
            .as_deref()
            .map(|root: &Path| root.join(CHALLENGE_DIR).join(token))
    }
}

/// Tokens are base64url strings; anything else could escape the webroot
fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Withdraws a published challenge when dropped
#[derive(Debug)]
pub struct ChallengeGuard {
    manager: ChallengeManager,
    token: String,
}

impl ChallengeGuard {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for ChallengeGuard {
    fn drop(&mut self) {
        self.manager.remove_challenge(&self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_and_get_challenge() {
        let manager = ChallengeManager::new();

        manager
            .add_challenge("a.example.com", "test-token", "test-key-auth")
            .unwrap();

        let response = manager.get_response("test-token");
        assert_eq!(response, Some("test-key-auth".to_string()));
    }

    #[test]
    fn test_get_nonexistent_challenge() {
        let manager = ChallengeManager::new();
        assert_eq!(manager.get_response("nonexistent"), None);
    }

    #[test]
    fn test_remove_challenge() {
        let manager = ChallengeManager::new();

        manager
            .add_challenge("a.example.com", "test-token", "test-key-auth")
            .unwrap();
        assert_eq!(manager.pending_count(), 1);

        manager.remove_challenge("test-token");
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.get_response("test-token"), None);
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            ChallengeManager::extract_token("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(ChallengeManager::extract_token("/other/path"), None);
        assert_eq!(
            ChallengeManager::extract_token("/.well-known/acme-challenge"),
            None
        );
    }

    #[test]
    fn test_rejects_path_like_tokens() {
        let manager = ChallengeManager::new();
        assert!(manager
            .add_challenge("a.example.com", "../../etc/passwd", "x")
            .is_err());
        assert!(manager.add_challenge("a.example.com", "", "x").is_err());
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let manager = ChallengeManager::new();

        {
            let guard = manager.publish("a.example.com", "tok", "auth").unwrap();
            assert_eq!(guard.token(), "tok");
            assert_eq!(manager.get_response("tok"), Some("auth".to_string()));
        }

        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_webroot_artifacts_are_isolated() {
        let dir = TempDir::new().unwrap();
        let manager = ChallengeManager::with_webroot(dir.path());
        let artifact_dir = dir.path().join(CHALLENGE_DIR);

        manager.add_challenge("a.example.com", "tokA", "authA").unwrap();
        manager.add_challenge("b.example.com", "tokB", "authB").unwrap();

        assert_eq!(
            fs::read_to_string(artifact_dir.join("tokA")).unwrap(),
            "authA"
        );

        manager.remove_challenge("tokA");
        assert!(!artifact_dir.join("tokA").exists());
        assert_eq!(
            fs::read_to_string(artifact_dir.join("tokB")).unwrap(),
            "authB"
        );
    }

    #[test]
    fn test_clear_challenges() {
        let manager = ChallengeManager::new();

        manager.add_challenge("a.example.com", "token1", "auth1").unwrap();
        manager.add_challenge("b.example.com", "token2", "auth2").unwrap();
        assert_eq!(manager.pending_count(), 2);

        manager.clear();
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_clone_shares_state() {
        let manager1 = ChallengeManager::new();
        let manager2 = manager1.clone();

        manager1.add_challenge("a.example.com", "token", "auth").unwrap();

        assert_eq!(manager2.get_response("token"), Some("auth".to_string()));
    }
}
