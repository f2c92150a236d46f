use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use super::types::{AccountCredentials, AuthResponse, CredentialBundle};
use crate::error_handling::types::AuthError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The identity provider's three operations.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(false)` when the provider rejects the token.
    async fn validate(&self, access_token: &str) -> Result<bool, AuthError>;

    async fn refresh(&self, access_token: &str) -> Result<CredentialBundle, AuthError>;

    async fn authenticate(&self, account: &AccountCredentials) -> Result<CredentialBundle, AuthError>;
}

/// JSON-over-HTTPS client for a Yggdrasil-style authentication server.
pub struct YggdrasilAuthenticator {
    client: Client,
    base_url: String,
}

impl YggdrasilAuthenticator {
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
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, AuthError> {
        trace!("POST {}", self.url(path));
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))
    }

    async fn request_bundle<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<CredentialBundle, AuthError> {
        let res = self.post(path, body).await?;
        let status = res.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unknown").to_string();
            return Err(AuthError::Rejected(status.as_u16(), reason));
        }
        let body: AuthResponse = res
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        debug!("{} succeeded for profile {}", path, body.selected_profile.name);
        Ok(body.into())
    }
}

#[async_trait]
impl Authenticator for YggdrasilAuthenticator {
    async fn validate(&self, access_token: &str) -> Result<bool, AuthError> {
        let res = self
            .post("validate", &json!({ "accessToken": access_token }))
            .await?;
        Ok(res.status().is_success())
    }

    async fn refresh(&self, access_token: &str) -> Result<CredentialBundle, AuthError> {
        self.request_bundle("refresh", &json!({ "accessToken": access_token }))
            .await
    }

    async fn authenticate(&self, account: &AccountCredentials) -> Result<CredentialBundle, AuthError> {
        let body = json!({
            "agent": { "name": "Minecraft", "version": 1 },
            "username": account.username,
            "password": account.password,
        });
        self.request_bundle("authenticate", &body).await
    }
}
