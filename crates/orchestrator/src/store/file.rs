//! File-backed certificate store
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! └── certificates/
//!     ├── certificates.json   # Rows and revision history (0600)
//!     └── renewal-log.jsonl   # One RenewalLog per line, append-only
//! ```
//!
//! `certificates.json` is rewritten through a temp file and a rename, so a
//! crash never leaves a half-written snapshot behind. Writes go through
//! `tokio::fs`; readers are served from memory and never wait on disk.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use certward_common::{CertificateId, CertificateProvider};

use super::model::{Certificate, CertificateMaterial, CertificateRevision, RenewalLog};
use super::state::{latest_logs, StoreState};
use super::{CertificateStore, StoreError};

const SNAPSHOT_FILE: &str = "certificates.json";
const SNAPSHOT_TEMP_FILE: &str = "certificates.json.tmp";
const RENEWAL_LOG_FILE: &str = "renewal-log.jsonl";

/// Store persisted under a private directory
#[derive(Debug)]
pub struct FileCertificateStore {
    base_path: PathBuf,
    state: RwLock<StoreState>,
    logs: RwLock<Vec<RenewalLog>>,
    /// Serializes snapshot writes
    writer: Mutex<()>,
    /// Serializes appends to the renewal log file
    log_file: Mutex<()>,
}

impl FileCertificateStore {
    /// Open (or create) a store at `base_path`
    ///
    /// The directory is created with 0700 permissions on Unix.
    pub fn open(base_path: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))?;
        }

        let snapshot_path = base_path.join(SNAPSHOT_FILE);
        let state = if snapshot_path.exists() {
            let content = fs::read_to_string(&snapshot_path)?;
            serde_json::from_str::<StoreState>(&content)?
        } else {
            StoreState::default()
        };

        let logs = load_logs(&base_path.join(RENEWAL_LOG_FILE))?;

        info!(
            storage_path = %base_path.display(),
            certificates = state.len(),
            renewal_logs = logs.len(),
            "Opened certificate store"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
            state: RwLock::new(state),
            logs: RwLock::new(logs),
            writer: Mutex::new(()),
            log_file: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Apply a mutation and persist the result
    ///
    /// The in-memory state only changes when the snapshot was written.
    /// Readers keep seeing the previous state while the write is in flight.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock().await;
        let mut next = self.state.read().clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *self.state.write() = next;
        Ok(out)
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(state)?;
        let temp_path = self.base_path.join(SNAPSHOT_TEMP_FILE);

        tokio::fs::write(&temp_path, &content).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&temp_path, self.base_path.join(SNAPSHOT_FILE)).await?;

        debug!(bytes = content.len(), "Persisted certificate snapshot");
        Ok(())
    }
}

fn load_logs(path: &Path) -> Result<Vec<RenewalLog>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(fs::File::open(path)?);
    let mut logs = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(log) => logs.push(log),
            // A torn final line from a crash must not block startup
            Err(e) => warn!(line = number + 1, error = %e, "Skipping unreadable renewal log line"),
        }
    }
    Ok(logs)
}

#[async_trait]
impl CertificateStore for FileCertificateStore {
    async fn upsert_active(
        &self,
        domain_name: &str,
        material: CertificateMaterial,
        provider: CertificateProvider,
        expires_at: DateTime<Utc>,
    ) -> Result<Certificate, StoreError> {
        let now = Utc::now();
        self.mutate(|state| {
            Ok(state.upsert_active(domain_name, material, provider, expires_at, now))
        })
        .await
    }

    async fn find_active(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(self.state.read().find_active(domain_name))
    }

    async fn find_by_domain(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(self.state.read().find_by_domain(domain_name))
    }

    async fn get(&self, id: &CertificateId) -> Result<Option<Certificate>, StoreError> {
        Ok(self.state.read().get(id))
    }

    async fn find_expiring_before(
        &self,
        threshold: DateTime<Utc>,
        auto_renew_only: bool,
    ) -> Result<Vec<Certificate>, StoreError> {
        Ok(self
            .state
            .read()
            .find_expiring_before(threshold, auto_renew_only))
    }

    async fn record_renewal_attempt(
        &self,
        id: &CertificateId,
        success: bool,
        error: Option<&str>,
    ) -> Result<Certificate, StoreError> {
        let now = Utc::now();
        self.mutate(|state| state.record_renewal_attempt(id, success, error, now))
            .await
    }

    async fn record_failure(
        &self,
        domain_name: &str,
        error: &str,
    ) -> Result<Certificate, StoreError> {
        let now = Utc::now();
        self.mutate(|state| Ok(state.record_failure(domain_name, error, now)))
            .await
    }

    async fn set_auto_renew(
        &self,
        id: &CertificateId,
        enabled: bool,
    ) -> Result<Certificate, StoreError> {
        self.mutate(|state| state.set_auto_renew(id, enabled))
            .await
    }

    async fn refresh_statuses(
        &self,
        now: DateTime<Utc>,
        expiring_window: Duration,
    ) -> Result<usize, StoreError> {
        // Avoid rewriting the snapshot when nothing moved
        let stale = self.state.read().stale_statuses(now, expiring_window);
        if stale == 0 {
            return Ok(0);
        }
        self.mutate(|state| Ok(state.refresh_statuses(now, expiring_window)))
            .await
    }

    async fn revisions(&self, id: &CertificateId) -> Result<Vec<CertificateRevision>, StoreError> {
        Ok(self.state.read().revisions(id))
    }

    async fn archive(&self, domain_name: &str) -> Result<Option<Certificate>, StoreError> {
        self.mutate(|state| Ok(state.archive(domain_name)))
            .await
    }

    async fn append_renewal_log(&self, log: RenewalLog) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&log)?;
        line.push('\n');

        {
            let _guard = self.log_file.lock().await;
            let path = self.base_path.join(RENEWAL_LOG_FILE);
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }

        self.logs.write().push(log);
        Ok(())
    }

    async fn renewal_logs(&self, limit: usize) -> Result<Vec<RenewalLog>, StoreError> {
        Ok(latest_logs(&self.logs.read(), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RenewalLogEntry;
    use certward_common::CertificateStatus;
    use tempfile::TempDir;

    fn material(tag: &str) -> CertificateMaterial {
        CertificateMaterial {
            certificate_pem: format!("cert-{tag}"),
            private_key_pem: format!("key-{tag}"),
            chain_pem: String::new(),
        }
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificates");
        let expires = Utc::now() + Duration::days(90);

        let id = {
            let store = FileCertificateStore::open(&path).unwrap();
            store
                .upsert_active("a.example.com", material("1"), CertificateProvider::SelfSigned, expires)
                .await
                .unwrap();
            let cert = store
                .upsert_active("a.example.com", material("2"), CertificateProvider::Authority, expires)
                .await
                .unwrap();
            store
                .record_renewal_attempt(&cert.id, false, Some("rate limited"))
                .await
                .unwrap();
            cert.id
        };

        let reopened = FileCertificateStore::open(&path).unwrap();
        let cert = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(cert.revision, 2);
        assert_eq!(cert.provider, Some(CertificateProvider::Authority));
        assert_eq!(cert.status, CertificateStatus::Active);
        assert_eq!(cert.last_renewal_error.as_deref(), Some("rate limited"));
        assert_eq!(reopened.revisions(&id).await.unwrap().len(), 1);
        assert!(!path.join(SNAPSHOT_TEMP_FILE).exists());
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_serialized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificates");
        let store = FileCertificateStore::open(&path).unwrap();
        let expires = Utc::now() + Duration::days(90);

        let writes = (0..5).map(|tag| {
            store.upsert_active(
                "a.example.com",
                material(&tag.to_string()),
                CertificateProvider::Authority,
                expires,
            )
        });
        futures::future::join_all(writes).await;

        let cert = store.find_active("a.example.com").await.unwrap().unwrap();
        assert_eq!(cert.revision, 5);
        assert_eq!(store.revisions(&cert.id).await.unwrap().len(), 4);

        let reopened = FileCertificateStore::open(&path).unwrap();
        assert_eq!(reopened.get(&cert.id).await.unwrap(), Some(cert));
    }

    #[tokio::test]
    async fn test_unchanged_statuses_skip_the_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificates");
        let store = FileCertificateStore::open(&path).unwrap();

        let changed = store
            .refresh_statuses(Utc::now(), Duration::days(30))
            .await
            .unwrap();

        assert_eq!(changed, 0);
        assert!(!path.join(SNAPSHOT_FILE).exists());
    }

    #[tokio::test]
    async fn test_renewal_log_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificates");
        let now = Utc::now();

        {
            let store = FileCertificateStore::open(&path).unwrap();
            store
                .append_renewal_log(RenewalLog::from_entries(now, now, Vec::new()))
                .await
                .unwrap();
            let entry = RenewalLogEntry {
                certificate_id: CertificateId::new(),
                domain_name: "a.example.com".to_string(),
                success: false,
                provider: None,
                expires_at: None,
                error: Some("timeout".to_string()),
                attempts: 2,
            };
            store
                .append_renewal_log(RenewalLog::from_entries(now, now, vec![entry]))
                .await
                .unwrap();
        }

        let content = fs::read_to_string(path.join(RENEWAL_LOG_FILE)).unwrap();
        assert_eq!(content.lines().count(), 2);

        let reopened = FileCertificateStore::open(&path).unwrap();
        let logs = reopened.renewal_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].failed, 1);
        assert_eq!(logs[1].processed, 0);
    }

    #[tokio::test]
    async fn test_torn_log_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificates");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(RENEWAL_LOG_FILE), "{\"id\":").unwrap();

        let store = FileCertificateStore::open(&path).unwrap();
        assert!(store.renewal_logs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificates");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(SNAPSHOT_FILE), "not json").unwrap();

        let err = FileCertificateStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snapshot_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificates");
        let store = FileCertificateStore::open(&path).unwrap();
        store
            .record_failure("a.example.com", "challenge failed")
            .await
            .unwrap();

        let mode = fs::metadata(path.join(SNAPSHOT_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
