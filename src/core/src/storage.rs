//! Storage subsystem
//!
//! Persistence of the credential bundle between process restarts.
//!
//! Components:
//! - `storage_trait`: the [`CredentialStore`] trait defining a uniform API.
//! - `file_storage`: JSON file implementation with atomic replacement.

pub mod file_storage;
pub mod storage_trait;

pub use file_storage::FileCredentialStore;
pub use storage_trait::CredentialStore;
