use serde::Serialize;

use crate::protocol::v340;

/// Body of the status response shown in a client's server list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub version: StatusVersion,
    pub players: StatusPlayers,
    pub description: StatusText,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusVersion {
    pub name: String,
    pub protocol: i32,
}

/// `-1` for both: the gateway does not track players.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPlayers {
    pub online: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusText {
    pub text: String,
}

impl StatusResponse {
    pub fn new(description: &str) -> Self {
        Self {
            version: StatusVersion {
                name: v340::VERSION_NAME.to_string(),
                protocol: v340::PROTOCOL_VERSION,
            },
            players: StatusPlayers { online: -1, max: -1 },
            description: StatusText {
                text: description.to_string(),
            },
        }
    }
}

/// Parsed handshake of an incoming spectator connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: crate::protocol::NextState,
}
