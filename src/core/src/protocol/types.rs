use super::codec;
use crate::error_handling::types::TransportError;

/// One uncompressed, unencrypted packet: the id varint followed by its payload.
///
/// The raw bytes are kept exactly as they came off the frame so the recorder can
/// store them without re-encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: i32,
    raw: Vec<u8>,
    payload_start: usize,
}

impl Packet {
    pub fn new(id: i32, payload: &[u8]) -> Self {
        let mut raw = Vec::with_capacity(payload.len() + 5);
        codec::write_varint(&mut raw, id);
        let payload_start = raw.len();
        raw.extend_from_slice(payload);
        Self {
            id,
            raw,
            payload_start,
        }
    }

    pub fn from_raw(raw: Vec<u8>) -> Result<Self, TransportError> {
        let (id, payload_start) = codec::read_varint(&raw)?;
        Ok(Self {
            id,
            raw,
            payload_start,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[self.payload_start..]
    }

    /// Id varint plus payload.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// State requested by the handshake packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
}

impl NextState {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            1 => Some(NextState::Status),
            2 => Some(NextState::Login),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            NextState::Status => 1,
            NextState::Login => 2,
        }
    }
}

/// Packet ids and layouts of protocol version 340 (game version 1.12.2).
///
/// Every layout assumption the core makes lives here, so supporting another
/// protocol version means adding a sibling table rather than hunting offsets.
pub mod v340 {
    pub const PROTOCOL_VERSION: i32 = 340;
    pub const VERSION_NAME: &str = "1.12.2";

    pub mod handshake {
        pub const HANDSHAKE: i32 = 0x00;
    }

    pub mod status {
        pub const REQUEST: i32 = 0x00;
        pub const RESPONSE: i32 = 0x00;
        pub const PING: i32 = 0x01;
        pub const PONG: i32 = 0x01;
    }

    pub mod login {
        pub const DISCONNECT: i32 = 0x00;
        pub const ENCRYPTION_REQUEST: i32 = 0x01;
        pub const SUCCESS: i32 = 0x02;
        pub const SET_COMPRESSION: i32 = 0x03;
        pub const LOGIN_START: i32 = 0x00;
        pub const ENCRYPTION_RESPONSE: i32 = 0x01;
    }

    pub mod play {
        pub const DISCONNECT: i32 = 0x1A;
        pub const KEEP_ALIVE: i32 = 0x1F;
        pub const POSITION_AND_LOOK: i32 = 0x2F;

        pub const TELEPORT_CONFIRM: i32 = 0x00;
        pub const KEEP_ALIVE_RESPONSE: i32 = 0x0B;

        /// x, y, z as doubles, yaw and pitch as floats, then the flags byte;
        /// the teleport id varint follows.
        pub const POSITION_TELEPORT_ID_OFFSET: usize = 3 * 8 + 2 * 4 + 1;
    }
}
