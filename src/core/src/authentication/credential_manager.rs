use std::sync::Arc;

use log::{error, info, warn};

use super::authenticator::Authenticator;
use super::types::{AccountCredentials, CredentialBundle};
use crate::error_handling::types::AuthError;
use crate::storage::CredentialStore;

/// Produces a usable credential bundle from whatever is available.
///
/// The chain, stopping at the first success:
/// 1. validate the previous bundle and reuse it unchanged
/// 2. refresh the previous bundle's token
/// 3. authenticate with the configured username/password
///
/// Every bundle returned is persisted through the [`CredentialStore`] first, so a
/// restarted process resumes at step 1. Retrying a failed chain is the caller's job.
pub struct CredentialManager {
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn CredentialStore>,
    account: Option<AccountCredentials>,
}

impl CredentialManager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn CredentialStore>,
        account: Option<AccountCredentials>,
    ) -> Self {
        if account.is_none() {
            info!("No username/password configured, relying on persisted credentials");
        }
        Self {
            authenticator,
            store,
            account,
        }
    }

    /// Reads the persisted bundle; unreadable or corrupt files count as absent.
    pub fn load_persisted(&self) -> Option<CredentialBundle> {
        match self.store.load() {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!("Ignoring persisted credentials: {}", e);
                None
            }
        }
    }

    pub async fn obtain(
        &self,
        previous: Option<CredentialBundle>,
    ) -> Result<CredentialBundle, AuthError> {
        let bundle = self.acquire(previous).await?;
        if let Err(e) = self.store.save(&bundle) {
            error!("Unable to persist credentials: {}", e);
        }
        Ok(bundle)
    }

    async fn acquire(&self, previous: Option<CredentialBundle>) -> Result<CredentialBundle, AuthError> {
        if let Some(previous) = previous {
            match self.authenticator.validate(&previous.access_token).await {
                Ok(true) => {
                    info!("Credentials for {} are still valid", previous.name);
                    return Ok(previous);
                }
                Ok(false) => info!("Credentials for {} expired, refreshing", previous.name),
                Err(e) => warn!("Could not validate credentials ({}), refreshing", e),
            }

            match self.authenticator.refresh(&previous.access_token).await {
                Ok(bundle) => {
                    info!("Refreshed credentials for {}", bundle.name);
                    return Ok(bundle);
                }
                Err(e) => warn!("Credential refresh failed: {}", e),
            }
        }

        let account = self.account.as_ref().ok_or(AuthError::NoCredentials)?;
        let bundle = self.authenticator.authenticate(account).await?;
        info!("Authenticated as {}", bundle.name);
        Ok(bundle)
    }
}
