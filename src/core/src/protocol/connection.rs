use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::trace;
use tokio::io::{
    split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};

use super::codec::{self, MAX_VARINT_LEN};
use super::encryption::Cfb8Stream;
use super::types::Packet;
use crate::error_handling::types::TransportError;

/// Largest frame the protocol allows (3-byte varint length).
pub const MAX_FRAME_LEN: usize = (1 << 21) - 1;

/// Reading half of a framed connection.
///
/// Frames are `varint length | body`; once compression is enabled the body is
/// `varint uncompressed length | zlib data`, with an uncompressed length of 0
/// marking a body sent as-is. Encryption, when enabled, covers every byte
/// read from then on, length prefix included.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    compression: Option<usize>,
    cipher: Option<Cfb8Stream>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            compression: None,
            cipher: None,
        }
    }

    pub fn set_compression(&mut self, threshold: Option<usize>) {
        self.compression = threshold;
    }

    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), TransportError> {
        self.cipher = Some(Cfb8Stream::decryptor(shared_secret)?);
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.inner.read_exact(buf).await?;
        if let Some(cipher) = &mut self.cipher {
            cipher.apply(buf)?;
        }
        Ok(())
    }

    async fn read_frame_len(&mut self) -> Result<i32, TransportError> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_LEN {
            let mut byte = [0u8; 1];
            self.read_exact(&mut byte).await?;
            value |= ((byte[0] & 0x7F) as u32) << (7 * i);
            if byte[0] & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(TransportError::Malformed(String::from("frame length varint too long")))
    }

    /// Reads the next packet.
    ///
    /// Not cancel-safe: a read abandoned half-way leaves the stream misaligned,
    /// so callers drop the connection after cancelling it.
    pub async fn read_packet(&mut self) -> Result<Packet, TransportError> {
        let len = self.read_frame_len().await?;
        if len <= 0 || len as usize > MAX_FRAME_LEN {
            return Err(TransportError::Malformed(format!("invalid frame length {}", len)));
        }

        let mut frame = vec![0u8; len as usize];
        self.read_exact(&mut frame).await?;

        let body = match self.compression {
            None => frame,
            Some(_) => {
                let (data_len, header_len) = codec::read_varint(&frame)?;
                if data_len == 0 {
                    frame.split_off(header_len)
                } else {
                    if data_len < 0 || data_len as usize > MAX_FRAME_LEN * 8 {
                        return Err(TransportError::Malformed(format!(
                            "invalid uncompressed length {}",
                            data_len
                        )));
                    }
                    let mut body = Vec::with_capacity(data_len as usize);
                    ZlibDecoder::new(&frame[header_len..])
                        .read_to_end(&mut body)
                        .map_err(|e| TransportError::Malformed(e.to_string()))?;
                    if body.len() != data_len as usize {
                        return Err(TransportError::Malformed(format!(
                            "decompressed {} byte(s), header announced {}",
                            body.len(),
                            data_len
                        )));
                    }
                    body
                }
            }
        };

        let packet = Packet::from_raw(body)?;
        trace!("read packet 0x{:02x} ({} bytes)", packet.id(), packet.len());
        Ok(packet)
    }
}

/// Writing half of a framed connection.
pub struct FrameWriter<W> {
    inner: W,
    compression: Option<usize>,
    cipher: Option<Cfb8Stream>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            compression: None,
            cipher: None,
        }
    }

    pub fn set_compression(&mut self, threshold: Option<usize>) {
        self.compression = threshold;
    }

    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), TransportError> {
        self.cipher = Some(Cfb8Stream::encryptor(shared_secret)?);
        Ok(())
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let mut frame = encode_frame(packet, self.compression)?;
        if let Some(cipher) = &mut self.cipher {
            cipher.apply(&mut frame)?;
        }
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        trace!("wrote packet 0x{:02x} ({} bytes)", packet.id(), packet.len());
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Encodes one packet into its on-wire frame.
pub fn encode_frame(packet: &Packet, compression: Option<usize>) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::with_capacity(packet.len() + MAX_VARINT_LEN);
    match compression {
        None => body.extend_from_slice(packet.raw()),
        Some(threshold) if packet.len() < threshold => {
            codec::write_varint(&mut body, 0);
            body.extend_from_slice(packet.raw());
        }
        Some(_) => {
            codec::write_varint(&mut body, packet.len() as i32);
            let mut encoder = ZlibEncoder::new(body, Compression::default());
            encoder.write_all(packet.raw())?;
            body = encoder.finish()?;
        }
    }

    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::Malformed(format!(
            "frame of {} bytes exceeds protocol limit",
            body.len()
        )));
    }

    let mut frame = Vec::with_capacity(body.len() + MAX_VARINT_LEN);
    codec::write_varint(&mut frame, body.len() as i32);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// A framed, optionally compressed packet connection over any byte stream.
pub struct Connection<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = split(stream);
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    pub async fn read_packet(&mut self) -> Result<Packet, TransportError> {
        self.reader.read_packet().await
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.writer.write_packet(packet).await
    }

    /// Applies the same threshold to both directions.
    pub fn set_compression(&mut self, threshold: Option<usize>) {
        self.reader.set_compression(threshold);
        self.writer.set_compression(threshold);
    }

    /// Encrypts both directions from the next byte on.
    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), TransportError> {
        self.reader.enable_encryption(shared_secret)?;
        self.writer.enable_encryption(shared_secret)
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await
    }

    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::PacketBuilder;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_reads_uncompressed_frame() {
        let mock = Builder::new().read(&[0x03, 0x01, 0xAA, 0xBB]).build();
        let mut connection = Connection::new(mock);

        let packet = connection.read_packet().await.unwrap();
        assert_eq!(packet.id(), 0x01);
        assert_eq!(packet.payload(), &[0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_writes_uncompressed_frame() {
        let mock = Builder::new().write(&[0x02, 0x00, 0x07]).build();
        let mut connection = Connection::new(mock);

        let packet = PacketBuilder::new(0x00).write_varint(7).build();
        connection.write_packet(&packet).await.unwrap();
    }

    #[test]
    fn test_small_packet_below_threshold_is_sent_raw() {
        let packet = Packet::new(0x0B, &[1, 2, 3]);
        let frame = encode_frame(&packet, Some(256)).unwrap();
        assert_eq!(frame, vec![0x05, 0x00, 0x0B, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_compressed_frames_cross_the_wire() {
        let (client, server) = duplex(64 * 1024);
        let mut client = Connection::new(client);
        let mut server = Connection::new(server);
        client.set_compression(Some(256));
        server.set_compression(Some(256));

        let big = Packet::new(0x20, &vec![42u8; 4096]);
        let small = Packet::new(0x21, b"tiny");
        client.write_packet(&big).await.unwrap();
        client.write_packet(&small).await.unwrap();

        assert_eq!(server.read_packet().await.unwrap(), big);
        assert_eq!(server.read_packet().await.unwrap(), small);
    }

    #[tokio::test]
    async fn test_encrypted_and_compressed_frames_cross_the_wire() {
        let (client, server) = duplex(64 * 1024);
        let mut client = Connection::new(client);
        let mut server = Connection::new(server);

        let secret = [3u8; 16];
        client.enable_encryption(&secret).unwrap();
        server.enable_encryption(&secret).unwrap();
        client.set_compression(Some(256));
        server.set_compression(Some(256));

        let big = Packet::new(0x20, &vec![42u8; 4096]);
        let small = Packet::new(0x21, b"tiny");
        client.write_packet(&big).await.unwrap();
        client.write_packet(&small).await.unwrap();
        server.write_packet(&small).await.unwrap();

        assert_eq!(server.read_packet().await.unwrap(), big);
        assert_eq!(server.read_packet().await.unwrap(), small);
        assert_eq!(client.read_packet().await.unwrap(), small);
    }

    #[tokio::test]
    async fn test_encrypted_bytes_on_the_wire_differ_from_plain_frame() {
        let (client, mut raw) = duplex(1024);
        let mut client = Connection::new(client);
        client.enable_encryption(&[9u8; 16]).unwrap();

        let packet = Packet::new(0x0B, &[1, 2, 3]);
        client.write_packet(&packet).await.unwrap();

        let plain = encode_frame(&packet, None).unwrap();
        let mut wire = vec![0u8; plain.len()];
        raw.read_exact(&mut wire).await.unwrap();
        assert_ne!(wire, plain);

        let mut cipher = Cfb8Stream::decryptor(&[9u8; 16]).unwrap();
        cipher.apply(&mut wire).unwrap();
        assert_eq!(wire, plain);
    }

    #[tokio::test]
    async fn test_eof_maps_to_closed() {
        let mock = Builder::new().build();
        let mut connection = Connection::new(mock);
        match connection.read_packet().await {
            Err(TransportError::Closed) => {}
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_length_frame_is_malformed() {
        let mock = Builder::new().read(&[0x00]).build();
        let mut connection = Connection::new(mock);
        assert!(matches!(
            connection.read_packet().await,
            Err(TransportError::Malformed(_))
        ));
    }
}
