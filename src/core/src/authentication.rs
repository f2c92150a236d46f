//! Credential lifecycle.
//!
//! - `types`: the [`CredentialBundle`] and identity-provider wire types
//! - `authenticator`: the [`Authenticator`] seam and its HTTP implementation
//! - `credential_manager`: the validate → refresh → authenticate chain
//! - `session_service`: session-server join and join verification for encrypted logins

pub mod authenticator;
pub mod credential_manager;
pub mod session_service;
pub mod types;

pub use authenticator::{Authenticator, YggdrasilAuthenticator};
pub use credential_manager::CredentialManager;
pub use session_service::{MojangSessionService, SessionService};
pub use types::{AccountCredentials, CredentialBundle, SelectedProfile};
