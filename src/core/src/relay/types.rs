use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::protocol::{Connection, Packet};

/// Any byte stream a spectator can arrive on.
pub trait SpectatorIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SpectatorIo for T {}

pub type SpectatorStream = Box<dyn SpectatorIo>;

/// A downstream client that finished its login exchange with the gateway.
///
/// The connection is still in the login state, with compression already
/// negotiated; the relay sends the login success itself.
pub struct Spectator {
    pub name: String,
    pub peer: String,
    pub connection: Connection<SpectatorStream>,
}

/// Identity the upstream server assigned to the bot at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotProfile {
    pub uuid: String,
    pub name: String,
}

/// Fans one live upstream session out to spectators.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Hands one steady-state packet to every attached spectator. Must not block.
    fn forward(&self, packet: Arc<Packet>);

    /// Takes ownership of a spectator connection for the rest of its life.
    fn attach(&self, spectator: Spectator);

    /// Disconnects every attached spectator and refuses new ones.
    async fn shutdown(&self);

    fn spectator_count(&self) -> usize;
}

/// Builds one relay per steady-state session.
pub trait RelayFactory: Send + Sync {
    fn create(&self, session_id: Uuid, profile: BotProfile) -> Arc<dyn Relay>;
}
