use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, StatusCode};
use serde_json::json;

use super::types::{CredentialBundle, SelectedProfile};
use crate::error_handling::types::AuthError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The session server both ends of an encrypted login consult.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Client side: registers that `bundle`'s profile is joining the server
    /// identified by `server_hash`.
    async fn join(&self, bundle: &CredentialBundle, server_hash: &str) -> Result<(), AuthError>;

    /// Server side: the profile that joined under `server_hash`, if `name` did.
    async fn has_joined(
        &self,
        name: &str,
        server_hash: &str,
    ) -> Result<Option<SelectedProfile>, AuthError>;
}

pub struct MojangSessionService {
    client: Client,
    base_url: String,
}

impl MojangSessionService {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/minecraft/{}", self.base_url, path)
    }
}

fn rejected(status: StatusCode) -> AuthError {
    let reason = status.canonical_reason().unwrap_or("unknown").to_string();
    AuthError::Rejected(status.as_u16(), reason)
}

#[async_trait]
impl SessionService for MojangSessionService {
    async fn join(&self, bundle: &CredentialBundle, server_hash: &str) -> Result<(), AuthError> {
        trace!("POST {}", self.url("join"));
        let res = self
            .client
            .post(self.url("join"))
            .json(&json!({
                "accessToken": bundle.access_token,
                "selectedProfile": bundle.id,
                "serverId": server_hash,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !res.status().is_success() {
            return Err(rejected(res.status()));
        }
        debug!("Session server accepted join for {}", bundle.name);
        Ok(())
    }

    async fn has_joined(
        &self,
        name: &str,
        server_hash: &str,
    ) -> Result<Option<SelectedProfile>, AuthError> {
        trace!("GET {}", self.url("hasJoined"));
        let res = self
            .client
            .get(self.url("hasJoined"))
            .query(&[("username", name), ("serverId", server_hash)])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        match res.status() {
            StatusCode::OK => {
                let profile: SelectedProfile = res
                    .json()
                    .await
                    .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
                Ok(Some(profile))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status => Err(rejected(status)),
        }
    }
}
