//! Credential Store Trait
//!
//! The store holds at most one [`CredentialBundle`]. It is read once at startup (and
//! again after every session) and overwritten after every successful acquisition.

use crate::authentication::types::CredentialBundle;
use crate::error_handling::types::StorageError;

pub trait CredentialStore: Send + Sync {
    /// Loads the persisted bundle.
    ///
    /// `Ok(None)` when nothing has been persisted yet. Callers treat errors
    /// (including corrupt content) as "no previous credential".
    fn load(&self) -> Result<Option<CredentialBundle>, StorageError>;

    /// Replaces the persisted bundle.
    fn save(&self, bundle: &CredentialBundle) -> Result<(), StorageError>;
}
