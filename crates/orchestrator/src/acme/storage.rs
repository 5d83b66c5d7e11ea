//! Account credential storage for ACME
//!
//! Persists the ACME account so every issuance reuses the same account key.
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! └── acme/
//!     ├── account.json      # Account metadata (contact, directory, created)
//!     └── credentials.json  # instant-acme AccountCredentials (opaque, 0600)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::error::StorageError;

/// ACME account metadata for storage
///
/// The actual `instant_acme::AccountCredentials` is stored separately as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAccount {
    /// Account URL returned by the authority
    pub account_url: String,
    /// Directory the account was registered with
    pub directory: String,
    /// Contact email (for reference)
    #[serde(default)]
    pub contact_email: Option<String>,
    /// When the account was created
    pub created: DateTime<Utc>,
}

/// Account storage manager
///
/// Uses simple filesystem storage with restrictive permissions.
#[derive(Debug)]
pub struct AccountStorage {
    /// Base storage directory
    base_path: PathBuf,
}

impl AccountStorage {
    /// Create account storage at the given path
    ///
    /// Creates the directory if it doesn't exist and sets restrictive
    /// permissions (0700 on Unix).
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))?;
        }

        debug!(
            storage_path = %base_path.display(),
            "Initialized ACME account storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    /// Get the storage base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Load stored account metadata
    pub fn load_account(&self) -> Result<Option<StoredAccount>, StorageError> {
        let account_path = self.base_path.join("account.json");

        if !account_path.exists() {
            trace!("No stored ACME account found");
            return Ok(None);
        }

        let content = fs::read_to_string(&account_path)?;
        let account: StoredAccount = serde_json::from_str(&content)?;

        debug!(
            account_url = %account.account_url,
            created = %account.created,
            "Loaded ACME account metadata"
        );
        Ok(Some(account))
    }

    /// Save account metadata
    pub fn save_account(&self, account: &StoredAccount) -> Result<(), StorageError> {
        let account_path = self.base_path.join("account.json");
        let content = serde_json::to_string_pretty(account)?;
        write_private(&account_path, content.as_bytes())?;

        info!(
            account_url = %account.account_url,
            contact = ?account.contact_email,
            "Saved ACME account metadata"
        );
        Ok(())
    }

    /// Load raw credentials JSON (for `instant_acme::AccountCredentials`)
    pub fn load_credentials_json(&self) -> Result<Option<String>, StorageError> {
        let creds_path = self.base_path.join("credentials.json");

        if !creds_path.exists() {
            trace!("No stored ACME credentials found");
            return Ok(None);
        }

        let content = fs::read_to_string(&creds_path)?;
        debug!("Loaded ACME credentials JSON");
        Ok(Some(content))
    }

    /// Save raw credentials JSON (for `instant_acme::AccountCredentials`)
    pub fn save_credentials_json(&self, json: &str) -> Result<(), StorageError> {
        let creds_path = self.base_path.join("credentials.json");
        write_private(&creds_path, json.as_bytes())?;

        info!("Saved ACME credentials JSON");
        Ok(())
    }
}

/// Write a file readable only by the owner
pub(crate) fn write_private(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_storage() -> (TempDir, AccountStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = AccountStorage::new(&temp_dir.path().join("acme")).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_storage_creation() {
        let (_temp_dir, storage) = setup_storage();
        assert!(storage.base_path().exists());
    }

    #[test]
    fn test_credentials_json_save_load() {
        let (_temp_dir, storage) = setup_storage();
        assert!(storage.load_credentials_json().unwrap().is_none());

        let test_json = r#"{"test": "credentials"}"#;
        storage.save_credentials_json(test_json).unwrap();

        let loaded = storage.load_credentials_json().unwrap();
        assert_eq!(loaded.as_deref(), Some(test_json));
    }

    #[test]
    fn test_account_save_load() {
        let (_temp_dir, storage) = setup_storage();
        assert!(storage.load_account().unwrap().is_none());

        let account = StoredAccount {
            account_url: "https://acme.example.com/acct/1".to_string(),
            directory: "https://acme.example.com/directory".to_string(),
            contact_email: Some("ops@example.com".to_string()),
            created: Utc::now(),
        };
        storage.save_account(&account).unwrap();

        assert_eq!(storage.load_account().unwrap(), Some(account));
    }

    #[cfg(unix)]
    #[test]
    fn test_credentials_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp_dir, storage) = setup_storage();
        storage.save_credentials_json("{}").unwrap();

        let mode = fs::metadata(storage.base_path().join("credentials.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
