//! Dump file naming and record framing.
//!
//! A dump is a gzip stream of concatenated records:
//!
//! ```text
//! u32 BE length of what follows | f64 BE wall-clock milliseconds | packet bytes
//! ```

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use log::warn;

use super::types::CapturedPacket;

const LENGTH_PREFIX_LEN: usize = 4;
const TIMESTAMP_LEN: usize = 8;

/// `<unix seconds>.dump.gz`
pub fn dump_file_name(started_at: DateTime<Utc>) -> String {
    format!("{}.dump.gz", started_at.timestamp())
}

pub fn encode_record(packet: &CapturedPacket) -> Vec<u8> {
    let body_len = TIMESTAMP_LEN + packet.bytes.len();
    let mut record = Vec::with_capacity(LENGTH_PREFIX_LEN + body_len);
    record.extend_from_slice(&(body_len as u32).to_be_bytes());
    record.extend_from_slice(&(packet.timestamp.timestamp_millis() as f64).to_be_bytes());
    record.extend_from_slice(&packet.bytes);
    record
}

/// Decodes every complete record of a dump file.
///
/// A dump whose writer never finished (crash, kill -9) ends in a truncated gzip
/// stream; everything up to the last flush is still returned.
pub fn read_records(path: &Path) -> io::Result<Vec<CapturedPacket>> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let mut records = Vec::new();

    loop {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        match read_full(&mut decoder, &mut prefix)? {
            0 => break,
            LENGTH_PREFIX_LEN => {}
            _ => {
                warn!("{}: truncated record header", path.display());
                break;
            }
        }

        let body_len = u32::from_be_bytes(prefix) as usize;
        if body_len < TIMESTAMP_LEN {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("record length {} shorter than its timestamp", body_len),
            ));
        }

        let mut body = vec![0u8; body_len];
        if read_full(&mut decoder, &mut body)? != body_len {
            warn!("{}: truncated record body", path.display());
            break;
        }

        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&body[..TIMESTAMP_LEN]);
        let millis = f64::from_be_bytes(ts) as i64;
        let timestamp = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidData, format!("timestamp {} out of range", millis))
        })?;

        records.push(CapturedPacket {
            timestamp,
            bytes: body.split_off(TIMESTAMP_LEN),
        });
    }

    Ok(records)
}

/// Like `read_exact`, but reports how much was read before the stream ended
/// instead of failing. A missing gzip trailer counts as the end of the stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_file_name_uses_unix_seconds() {
        let started = Utc.timestamp_opt(1_536_000_000, 500_000_000).unwrap();
        assert_eq!(dump_file_name(started), "1536000000.dump.gz");
    }

    #[test]
    fn test_record_layout() {
        let timestamp = Utc.timestamp_millis_opt(1_536_000_000_123).unwrap();
        let record = encode_record(&CapturedPacket::new(&[0x1F, 1, 2], timestamp));

        assert_eq!(&record[..4], &11u32.to_be_bytes());
        assert_eq!(&record[4..12], &1_536_000_000_123f64.to_be_bytes());
        assert_eq!(&record[12..], &[0x1F, 1, 2]);
    }

    #[test]
    fn test_unfinished_stream_yields_complete_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.dump.gz");
        let timestamp = Utc.timestamp_millis_opt(1_000).unwrap();

        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::new(4));
        encoder
            .write_all(&encode_record(&CapturedPacket::new(b"first", timestamp)))
            .unwrap();
        encoder.flush().unwrap();
        // half a record, then the writer "crashes"
        encoder.write_all(&[0, 0, 0, 40, 1, 2]).unwrap();
        encoder.flush().unwrap();
        std::mem::forget(encoder);

        let records = read_records(&path).unwrap();
        assert_eq!(records, vec![CapturedPacket::new(b"first", timestamp)]);
    }
}
