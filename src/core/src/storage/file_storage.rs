use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, error, info};

use crate::authentication::types::CredentialBundle;
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::CredentialStore;

/// Stores the credential bundle as a single JSON object, e.g. `.profile.json`.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        debug!("FileCredentialStore using {}", path.display());
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<CredentialBundle>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No persisted credentials at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                error!("Failed to read {}: {}", self.path.display(), e);
                return Err(StorageError::ReadFailed(e.to_string()));
            }
        };

        let bundle: CredentialBundle = serde_json::from_str(&content).map_err(|e| {
            error!("Ignoring corrupt credential file {}: {}", self.path.display(), e);
            StorageError::Corrupt(e.to_string())
        })?;
        info!("Loaded persisted credentials for {}", bundle.name);
        Ok(Some(bundle))
    }

    // Write-then-rename so a crash never leaves a truncated file behind.
    fn save(&self, bundle: &CredentialBundle) -> Result<(), StorageError> {
        let json =
            serde_json::to_string(bundle).map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        let tmp = self.temp_path();
        fs::write(&tmp, json).map_err(|e| {
            error!("Failed to write {}: {}", tmp.display(), e);
            StorageError::WriteFailed(e.to_string())
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            error!("Failed to move {} into place: {}", tmp.display(), e);
            let _ = fs::remove_file(&tmp);
            StorageError::WriteFailed(e.to_string())
        })?;
        debug!("Saved credentials for {} to {}", bundle.name, self.path.display());
        Ok(())
    }
}
