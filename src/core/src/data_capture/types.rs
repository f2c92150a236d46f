//! Common data types used across the data_capture subsystem.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One packet as it will appear in the dump: arrival time plus the raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPacket {
    pub timestamp: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

impl CapturedPacket {
    pub fn new(bytes: &[u8], timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bytes: bytes.to_vec(),
        }
    }
}

/// What a finished recorder reports about its dump file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSummary {
    /// The session the dump belongs to
    pub session_id: Uuid,
    /// Location of the `.dump.gz` file
    pub path: PathBuf,
    /// Records handed to the compressor
    pub records_written: u64,
    /// Records lost to a full buffer, a write failure or an unopenable file
    pub records_dropped: u64,
    /// Uncompressed bytes written, framing included
    pub bytes_written: u64,
}
