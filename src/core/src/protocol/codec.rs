use serde::Serialize;

use super::types::Packet;
use crate::error_handling::types::TransportError;

/// Longest varint encoding of a 32-bit value.
pub const MAX_VARINT_LEN: usize = 5;

pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
}

/// Decodes a varint at the start of `buf`, returning the value and its encoded length.
pub fn read_varint(buf: &[u8]) -> Result<(i32, usize), TransportError> {
    let mut value: u32 = 0;
    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value as i32, i + 1));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        Err(TransportError::Malformed(String::from("varint too long")))
    } else {
        Err(TransportError::Malformed(String::from("truncated varint")))
    }
}

/// Builds an outgoing packet field by field.
///
/// ```
/// use vigil::protocol::PacketBuilder;
///
/// let packet = PacketBuilder::new(0x00).write_varint(42).build();
/// assert_eq!(packet.raw(), &[0x00, 42]);
/// ```
pub struct PacketBuilder {
    id: i32,
    buf: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            buf: Vec::new(),
        }
    }

    pub fn write_varint(mut self, value: i32) -> Self {
        write_varint(&mut self.buf, value);
        self
    }

    pub fn write_string(mut self, value: &str) -> Self {
        write_varint(&mut self.buf, value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    /// Varint length followed by the bytes.
    pub fn write_byte_array(mut self, value: &[u8]) -> Self {
        write_varint(&mut self.buf, value.len() as i32);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn write_u16(mut self, value: u16) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_i64(mut self, value: i64) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Writes `value` as a JSON string field.
    pub fn write_json<T: Serialize>(self, value: &T) -> Result<Self, TransportError> {
        let json =
            serde_json::to_string(value).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(self.write_string(&json))
    }

    pub fn build(self) -> Packet {
        Packet::new(self.id, &self.buf)
    }
}

/// Cursor over a packet payload.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(packet: &'a Packet) -> Self {
        Self {
            buf: packet.payload(),
            offset: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), TransportError> {
        self.take(count).map(|_| ())
    }

    pub fn read_varint(&mut self) -> Result<i32, TransportError> {
        let rest = self.buf.get(self.offset..).unwrap_or_default();
        let (value, len) = read_varint(rest)?;
        self.offset += len;
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<String, TransportError> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(TransportError::Malformed(format!("negative string length {}", len)));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    pub fn read_byte_array(&mut self) -> Result<Vec<u8>, TransportError> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(TransportError::Malformed(format!("negative array length {}", len)));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    pub fn read_u16(&mut self) -> Result<u16, TransportError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, TransportError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(raw))
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], TransportError> {
        let end = self.offset.checked_add(count).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let buf: &'a [u8] = self.buf;
                let slice = &buf[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            None => Err(TransportError::Malformed(format!(
                "needed {} byte(s), {} left",
                count,
                self.remaining()
            ))),
        }
    }
}
