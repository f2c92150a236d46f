use crate::error_handling::types::TransportError;
use crate::protocol::{v340, Packet, PacketBuilder, PacketReader};

/// The reply the bot owes the server for `packet`, if any.
///
/// - Player Position And Look: Teleport Confirm with the same teleport id
/// - Keep Alive: Keep Alive echoing the same 8-byte id
pub fn maintenance_reply(packet: &Packet) -> Result<Option<Packet>, TransportError> {
    let mut reader = PacketReader::new(packet);
    match packet.id() {
        v340::play::POSITION_AND_LOOK => {
            reader.skip(v340::play::POSITION_TELEPORT_ID_OFFSET)?;
            let teleport_id = reader.read_varint()?;
            Ok(Some(
                PacketBuilder::new(v340::play::TELEPORT_CONFIRM)
                    .write_varint(teleport_id)
                    .build(),
            ))
        }
        v340::play::KEEP_ALIVE => {
            let id = reader.read_i64()?;
            Ok(Some(
                PacketBuilder::new(v340::play::KEEP_ALIVE_RESPONSE)
                    .write_i64(id)
                    .build(),
            ))
        }
        _ => Ok(None),
    }
}
