use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::authentication::SessionService;
use crate::error_handling::types::GatewayError;
use crate::protocol::encryption::{
    random_bytes, server_hash, EncryptionRequest, EncryptionResponse, ServerKeyPair,
    SHARED_SECRET_LEN, VERIFY_TOKEN_LEN,
};
use crate::protocol::{v340, Connection};
use crate::relay::SpectatorStream;

/// Connection-level setup run after a spectator announced its name and before
/// compression is enabled.
#[async_trait]
pub trait SpectatorLogin: Send + Sync {
    async fn negotiate(
        &self,
        name: &str,
        connection: &mut Connection<SpectatorStream>,
    ) -> Result<(), GatewayError>;
}

fn check_name(name: &str) -> Result<(), GatewayError> {
    if name.is_empty() || name.len() > 16 {
        return Err(GatewayError::LoginFailed(format!("invalid name {:?}", name)));
    }
    Ok(())
}

/// Offline-mode login: the announced name is accepted as is, no cipher.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineLogin;

#[async_trait]
impl SpectatorLogin for OfflineLogin {
    async fn negotiate(
        &self,
        name: &str,
        _connection: &mut Connection<SpectatorStream>,
    ) -> Result<(), GatewayError> {
        check_name(name)?;
        debug!("Accepting spectator {} in offline mode", name);
        Ok(())
    }
}

/// Online-mode login: encryption exchange keyed to the announced name, then a
/// session-server check that the account really joined.
pub struct OnlineLogin {
    keys: ServerKeyPair,
    sessions: Arc<dyn SessionService>,
}

impl OnlineLogin {
    /// Generates the gateway's RSA key pair.
    pub fn new(sessions: Arc<dyn SessionService>) -> Result<Self, GatewayError> {
        Ok(Self {
            keys: ServerKeyPair::generate()?,
            sessions,
        })
    }
}

#[async_trait]
impl SpectatorLogin for OnlineLogin {
    async fn negotiate(
        &self,
        name: &str,
        connection: &mut Connection<SpectatorStream>,
    ) -> Result<(), GatewayError> {
        check_name(name)?;

        let verify_token: [u8; VERIFY_TOKEN_LEN] = random_bytes()?;
        let request = EncryptionRequest {
            server_id: String::new(),
            public_key: self.keys.public_der().to_vec(),
            verify_token: verify_token.to_vec(),
        };
        connection.write_packet(&request.to_packet()).await?;

        let packet = connection.read_packet().await?;
        if packet.id() != v340::login::ENCRYPTION_RESPONSE {
            return Err(GatewayError::UnexpectedPacket(packet.id()));
        }
        let response = EncryptionResponse::parse(&packet)?;
        let secret = self.keys.decrypt(&response.shared_secret)?;
        if self.keys.decrypt(&response.verify_token)? != verify_token {
            return Err(GatewayError::LoginFailed(String::from("verify token mismatch")));
        }
        if secret.len() != SHARED_SECRET_LEN {
            return Err(GatewayError::LoginFailed(format!(
                "shared secret of {} byte(s)",
                secret.len()
            )));
        }
        connection.enable_encryption(&secret)?;

        let hash = server_hash("", &secret, self.keys.public_der());
        match self.sessions.has_joined(name, &hash).await {
            Ok(Some(profile)) => {
                info!("Spectator {} verified as {}", name, profile.id);
                Ok(())
            }
            Ok(None) => Err(GatewayError::LoginFailed(format!(
                "{} did not join through the session server",
                name
            ))),
            Err(e) => Err(GatewayError::LoginFailed(e.to_string())),
        }
    }
}
