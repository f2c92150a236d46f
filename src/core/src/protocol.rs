//! Minimal game-protocol support for the session core.
//!
//! Only what the bot session and the spectator gateway need is implemented:
//! - `types`: the [`Packet`] value and the protocol 340 constant table
//! - `codec`: varint/string primitives plus packet builders and readers
//! - `connection`: length-prefixed framing with optional zlib compression and AES/CFB8 encryption
//! - `encryption`: the login key exchange, the server hash and the stream cipher
//! - `transport`: the upstream [`Connector`]/[`UpstreamLink`] seam and its TCP implementation
//!
//! Gameplay packets are never decoded; payloads stay opaque bytes.

pub mod codec;
pub mod connection;
pub mod encryption;
pub mod transport;
pub mod types;

pub use codec::{PacketBuilder, PacketReader};
pub use connection::{Connection, FrameReader, FrameWriter};
pub use transport::{Connector, TcpConnector, UpstreamLink};
pub use types::{v340, NextState, Packet};
