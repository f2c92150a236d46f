//! # Spectator Gateway
//!
//! Accepts downstream game clients on the local listen port and routes each one
//! according to its handshake:
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌───────────────────────┐
//! │ Spectator    │───▶│ SpectatorGateway │───▶│ status responder      │
//! │ connections  │    │ - handshake      │    ├───────────────────────┤
//! └──────────────┘    │ - login start    │───▶│ published Relay       │
//!                     │ - compression    │    │ or "not connected"    │
//!                     └──────────────────┘    └───────────────────────┘
//! ```
//!
//! Every connection runs in its own task; the only state they share is the
//! [`RelaySlot`], read once per login.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;

use super::spectator_login::SpectatorLogin;
use super::status::serve_status;
use super::types::{Handshake, StatusResponse};
use crate::configuration::GatewayConfig;
use crate::error_handling::types::{GatewayError, TransportError};
use crate::protocol::{v340, Connection, NextState, Packet, PacketBuilder, PacketReader};
use crate::relay::{RelaySlot, Spectator, SpectatorStream};

/// Message shown to spectators when no session is live.
pub const NOT_CONNECTED_MESSAGE: &str = "bot is not connected";

/// Bound on the pre-login exchange of a single spectator.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection settings shared by all connection tasks.
struct GatewayContext {
    slot: RelaySlot,
    login: Arc<dyn SpectatorLogin>,
    status: StatusResponse,
    compression_threshold: i32,
}

pub struct SpectatorGateway {
    listener: TcpListener,
    context: Arc<GatewayContext>,
}

impl SpectatorGateway {
    /// Binds `bind_address:port`. A bind failure is fatal for the process.
    pub async fn bind(
        config: &GatewayConfig,
        port: u16,
        slot: RelaySlot,
        login: Arc<dyn SpectatorLogin>,
    ) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind((config.bind_address.as_str(), port))
            .await
            .map_err(GatewayError::BindFailed)?;
        info!(
            "Spectator gateway listening on {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| format!("{}:{}", config.bind_address, port))
        );

        Ok(Self {
            listener,
            context: Arc::new(GatewayContext {
                slot,
                login,
                status: StatusResponse::new(&config.description),
                compression_threshold: config.compression_threshold,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        self.listener.local_addr().map_err(GatewayError::BindFailed)
    }

    /// Accepts connections until the exiting flag is set.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait_for(|exiting| *exiting) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("[{}] Unable to set TCP_NODELAY: {}", peer, e);
                    }
                    let context = self.context.clone();
                    tokio::spawn(async move {
                        let stream: SpectatorStream = Box::new(stream);
                        if let Err(e) = handle_connection(stream, peer.to_string(), context).await {
                            warn!("[{}] {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("Accept failed: {}", e),
            }
        }
        info!("Spectator gateway stopped");
    }
}

async fn handle_connection(
    stream: SpectatorStream,
    peer: String,
    context: Arc<GatewayContext>,
) -> Result<(), GatewayError> {
    let mut connection = Connection::new(stream);

    let handshake = timeout(LOGIN_TIMEOUT, read_handshake(&mut connection))
        .await
        .map_err(|_| TransportError::Timeout)??;
    debug!(
        "[{}] Handshake: protocol {}, {}:{}, {:?}",
        peer,
        handshake.protocol_version,
        handshake.server_address,
        handshake.server_port,
        handshake.next_state
    );

    match handshake.next_state {
        NextState::Status => serve_status(&mut connection, &context.status).await,
        NextState::Login => {
            let name = timeout(LOGIN_TIMEOUT, login(&mut connection, &context))
                .await
                .map_err(|_| TransportError::Timeout)??;

            match context.slot.current() {
                Some(relay) => {
                    relay.attach(Spectator {
                        name,
                        peer,
                        connection,
                    });
                    Ok(())
                }
                None => {
                    info!("[{}] Turning {} away, no live session", peer, name);
                    let disconnect = PacketBuilder::new(v340::login::DISCONNECT)
                        .write_json(&json!({ "text": NOT_CONNECTED_MESSAGE }))?
                        .build();
                    connection.write_packet(&disconnect).await?;
                    connection.shutdown().await?;
                    Ok(())
                }
            }
        }
    }
}

async fn read_handshake(
    connection: &mut Connection<SpectatorStream>,
) -> Result<Handshake, GatewayError> {
    let packet = connection.read_packet().await?;
    if packet.id() != v340::handshake::HANDSHAKE {
        return Err(GatewayError::UnexpectedPacket(packet.id()));
    }
    parse_handshake(&packet)
}

fn parse_handshake(packet: &Packet) -> Result<Handshake, GatewayError> {
    let mut reader = PacketReader::new(packet);
    let protocol_version = reader.read_varint()?;
    let server_address = reader.read_string()?;
    let server_port = reader.read_u16()?;
    let next_state = reader.read_varint()?;
    Ok(Handshake {
        protocol_version,
        server_address,
        server_port,
        next_state: NextState::from_wire(next_state)
            .ok_or(GatewayError::InvalidNextState(next_state))?,
    })
}

/// Login start, connection setup and Set Compression. Returns the spectator's name.
async fn login(
    connection: &mut Connection<SpectatorStream>,
    context: &GatewayContext,
) -> Result<String, GatewayError> {
    let packet = connection.read_packet().await?;
    if packet.id() != v340::login::LOGIN_START {
        return Err(GatewayError::UnexpectedPacket(packet.id()));
    }
    let name = PacketReader::new(&packet).read_string()?;

    context.login.negotiate(&name, connection).await?;

    if context.compression_threshold >= 0 {
        let set_compression = PacketBuilder::new(v340::login::SET_COMPRESSION)
            .write_varint(context.compression_threshold)
            .build();
        connection.write_packet(&set_compression).await?;
        connection.set_compression(Some(context.compression_threshold as usize));
    }
    Ok(name)
}
