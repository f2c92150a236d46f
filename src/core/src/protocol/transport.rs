//! Upstream transport seam.
//!
//! The session controller only ever talks to an [`UpstreamLink`] obtained from a
//! [`Connector`]; the TCP implementation below is the production one, tests plug
//! in scripted links.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::codec::PacketReader;
use super::connection::Connection;
use super::encryption::{
    encrypt_for, random_bytes, server_hash, EncryptionRequest, EncryptionResponse,
    SHARED_SECRET_LEN,
};
use super::types::{v340, Packet};
use crate::authentication::{CredentialBundle, SessionService};
use crate::error_handling::types::TransportError;

/// A live packet connection to the remote server.
#[async_trait]
pub trait UpstreamLink: Send {
    async fn send(&mut self, packet: Packet) -> Result<(), TransportError>;

    /// Next inbound packet.
    ///
    /// Returns `None` once the remote closed the connection cleanly. The login
    /// wait is bounded by the link's own read timeout, surfaced as
    /// [`TransportError::Timeout`].
    async fn recv(&mut self) -> Option<Result<Packet, TransportError>>;

    /// Closes the connection, releasing its resources even if the close handshake fails.
    async fn close(&mut self);
}

/// Opens upstream links.
#[async_trait]
pub trait Connector: Send + Sync {
    /// `bundle` is the identity the link logs in with; it answers the
    /// server's encryption request on that identity's behalf.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        bundle: &CredentialBundle,
    ) -> Result<Box<dyn UpstreamLink>, TransportError>;
}

/// TCP connector with connect and per-read timeouts.
#[derive(Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    read_timeout: Duration,
    sessions: Arc<dyn SessionService>,
}

impl TcpConnector {
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        sessions: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            sessions,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        bundle: &CredentialBundle,
    ) -> Result<Box<dyn UpstreamLink>, TransportError> {
        debug!("Opening TCP connection to {}:{}", host, port);
        let stream = match timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::ConnectFailed(e)),
            Err(_) => return Err(TransportError::Timeout),
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Unable to set TCP_NODELAY on upstream socket: {}", e);
        }
        Ok(Box::new(TcpLink::new(
            stream,
            self.read_timeout,
            bundle.clone(),
            self.sessions.clone(),
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Login,
    Play,
}

/// Framed upstream connection.
///
/// While the login is in progress the link consumes Encryption Request and Set
/// Compression itself and turns Login Disconnect into an error; every other
/// packet is handed to the caller.
pub struct TcpLink<S = TcpStream> {
    connection: Connection<S>,
    phase: LinkPhase,
    read_timeout: Duration,
    bundle: CredentialBundle,
    sessions: Arc<dyn SessionService>,
}

impl<S> TcpLink<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send,
{
    pub fn new(
        stream: S,
        read_timeout: Duration,
        bundle: CredentialBundle,
        sessions: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            connection: Connection::new(stream),
            phase: LinkPhase::Login,
            read_timeout,
            bundle,
            sessions,
        }
    }

    /// Registers the join with the session server, answers with the sealed
    /// shared secret and switches the connection to CFB8.
    async fn answer_encryption_request(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let request = EncryptionRequest::parse(packet)?;
        let secret: [u8; SHARED_SECRET_LEN] = random_bytes()?;
        let hash = server_hash(&request.server_id, &secret, &request.public_key);

        self.sessions
            .join(&self.bundle, &hash)
            .await
            .map_err(TransportError::SessionJoin)?;

        let response = EncryptionResponse {
            shared_secret: encrypt_for(&request.public_key, &secret)?,
            verify_token: encrypt_for(&request.public_key, &request.verify_token)?,
        };
        self.connection.write_packet(&response.to_packet()).await?;
        self.connection.enable_encryption(&secret)?;
        debug!("Upstream connection encrypted");
        Ok(())
    }

    async fn handle_login_packet(&mut self, packet: &Packet) -> Result<bool, TransportError> {
        match packet.id() {
            v340::login::SET_COMPRESSION => {
                let threshold = PacketReader::new(packet).read_varint()?;
                debug!("Upstream enabled compression (threshold {})", threshold);
                self.connection
                    .set_compression(usize::try_from(threshold).ok());
                Ok(true)
            }
            v340::login::ENCRYPTION_REQUEST => {
                self.answer_encryption_request(packet).await?;
                Ok(true)
            }
            v340::login::DISCONNECT => {
                let reason = PacketReader::new(packet).read_string()?;
                Err(TransportError::LoginRejected(reason))
            }
            v340::login::SUCCESS => {
                self.phase = LinkPhase::Play;
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl<S> UpstreamLink for TcpLink<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send,
{
    async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        self.connection.write_packet(&packet).await
    }

    async fn recv(&mut self) -> Option<Result<Packet, TransportError>> {
        loop {
            let packet = match timeout(self.read_timeout, self.connection.read_packet()).await {
                Err(_) => return Some(Err(TransportError::Timeout)),
                Ok(Err(TransportError::Closed)) => return None,
                Ok(Err(e)) => return Some(Err(e)),
                Ok(Ok(packet)) => packet,
            };

            if self.phase == LinkPhase::Login {
                match self.handle_login_packet(&packet).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => return Some(Err(e)),
                }
            }
            return Some(Ok(packet));
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.connection.shutdown().await {
            debug!("Upstream shutdown reported: {}", e);
        }
    }
}
