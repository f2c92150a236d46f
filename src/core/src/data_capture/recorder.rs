//! Packet recording for a single upstream session.
//!
//! `PacketRecorder` owns one dump file. The session's receive path hands it
//! packets through a bounded channel and never waits on disk; a writer task
//! frames each record, feeds the gzip stream on the blocking pool and flushes
//! it on a fixed interval.
//!
//! Capture is lossy under pressure: a full buffer, a failed write or an
//! unopenable file cost records, never the session. Every loss is
//! logged and counted in the [`DumpSummary`] returned by [`PacketRecorder::finish`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::dump::{dump_file_name, encode_record};
use super::types::{CapturedPacket, DumpSummary};
use crate::error_handling::types::CaptureError;

/// zlib level 4, fast with a reasonable ratio.
const COMPRESSION_LEVEL: u32 = 4;

/// Warn on the first drop and then once per this many.
const DROP_LOG_EVERY: u64 = 1000;

/// Records handed to one blocking write.
const WRITE_BATCH: usize = 256;

type DumpEncoder = GzEncoder<BufWriter<File>>;

pub struct PacketRecorder {
    session_id: Uuid,
    path: PathBuf,
    sender: Option<mpsc::Sender<CapturedPacket>>,
    writer: Option<JoinHandle<WriterStats>>,
    captured: u64,
    dropped: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct WriterStats {
    written: u64,
    dropped: u64,
    bytes: u64,
}

impl WriterStats {
    fn add(&mut self, other: WriterStats) {
        self.written += other.written;
        self.dropped += other.dropped;
        self.bytes += other.bytes;
    }
}

impl PacketRecorder {
    /// Starts recording into `<dir>/<started_at seconds>.dump.gz`.
    ///
    /// Never fails: if the file cannot be created the recorder runs degraded
    /// and every record is counted as dropped. Must be called from within a
    /// tokio runtime.
    pub fn open(
        session_id: Uuid,
        dir: &Path,
        started_at: DateTime<Utc>,
        flush_interval: Duration,
        buffer_capacity: usize,
    ) -> Self {
        let path = dir.join(dump_file_name(started_at));
        let (sender, receiver) = mpsc::channel(buffer_capacity.max(1));
        let writer = tokio::spawn(run_writer(session_id, path.clone(), receiver, flush_interval));

        info!("[{}] Recording packets to {}", session_id, path.display());
        Self {
            session_id,
            path,
            sender: Some(sender),
            writer: Some(writer),
            captured: 0,
            dropped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues one record. Returns immediately whatever happens downstream.
    pub fn record(&mut self, bytes: &[u8], timestamp: DateTime<Utc>) {
        self.captured += 1;
        if let Err(e) = self.enqueue(CapturedPacket::new(bytes, timestamp)) {
            self.dropped += 1;
            if self.dropped % DROP_LOG_EVERY == 1 {
                warn!(
                    "[{}] {} ({} record(s) dropped so far)",
                    self.session_id, e, self.dropped
                );
            }
        }
    }

    fn enqueue(&self, packet: CapturedPacket) -> Result<(), CaptureError> {
        let sender = self.sender.as_ref().ok_or(CaptureError::WriterStopped)?;
        sender.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => CaptureError::BufferFull,
            TrySendError::Closed(_) => CaptureError::WriterStopped,
        })
    }

    /// Closes the channel, waits for the writer to finish the gzip stream and
    /// reports what ended up on disk.
    pub async fn finish(mut self) -> DumpSummary {
        drop(self.sender.take());

        let stats = match self.writer.take() {
            Some(handle) => match handle.await {
                Ok(stats) => stats,
                Err(e) => {
                    error!("[{}] {}: {}", self.session_id, CaptureError::WriterStopped, e);
                    WriterStats::default()
                }
            },
            None => WriterStats::default(),
        };

        let summary = DumpSummary {
            session_id: self.session_id,
            path: self.path.clone(),
            records_written: stats.written,
            records_dropped: self.dropped + stats.dropped,
            bytes_written: stats.bytes,
        };
        info!(
            "[{}] Closed {}: captured={}, written={}, dropped={}",
            self.session_id,
            summary.path.display(),
            self.captured,
            summary.records_written,
            summary.records_dropped
        );
        summary
    }
}

/// Runs `op` against the encoder on the blocking pool and hands the encoder back.
///
/// `None` means the blocking task died and took the encoder with it.
async fn with_encoder<T, F>(encoder: DumpEncoder, op: F) -> Option<(DumpEncoder, T)>
where
    F: FnOnce(&mut DumpEncoder) -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(move || {
        let mut encoder = encoder;
        let out = op(&mut encoder);
        (encoder, out)
    })
    .await
    .ok()
}

fn write_batch(session_id: Uuid, encoder: &mut DumpEncoder, batch: Vec<CapturedPacket>) -> WriterStats {
    let mut stats = WriterStats::default();
    for packet in &batch {
        let record = encode_record(packet);
        match encoder.write_all(&record) {
            Ok(()) => {
                stats.written += 1;
                stats.bytes += record.len() as u64;
            }
            Err(e) => {
                stats.dropped += 1;
                warn!("[{}] {}", session_id, CaptureError::Write(e));
            }
        }
    }
    stats
}

fn finalize(encoder: DumpEncoder) -> io::Result<()> {
    let mut inner = encoder.finish()?;
    inner.flush()?;
    let file = inner.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

/// Counts everything still queued as dropped until the recorder hangs up.
async fn drain(receiver: &mut mpsc::Receiver<CapturedPacket>) -> u64 {
    let mut dropped = 0;
    while receiver.recv().await.is_some() {
        dropped += 1;
    }
    dropped
}

async fn run_writer(
    session_id: Uuid,
    path: PathBuf,
    mut receiver: mpsc::Receiver<CapturedPacket>,
    flush_interval: Duration,
) -> WriterStats {
    let mut stats = WriterStats::default();

    let created = task::spawn_blocking(move || File::create(&path))
        .await
        .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)));
    let mut encoder = match created {
        Ok(file) => GzEncoder::new(BufWriter::new(file), Compression::new(COMPRESSION_LEVEL)),
        Err(e) => {
            error!("[{}] {}", session_id, CaptureError::Open(e));
            // keep draining so the session side never sees a full buffer
            stats.dropped = drain(&mut receiver).await;
            return stats;
        }
    };

    let mut flush = time::interval_at(Instant::now() + flush_interval, flush_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = Vec::with_capacity(WRITE_BATCH);

    loop {
        tokio::select! {
            received = receiver.recv_many(&mut batch, WRITE_BATCH) => {
                if received == 0 {
                    break;
                }
                let records = std::mem::take(&mut batch);
                let count = records.len() as u64;
                match with_encoder(encoder, move |e| write_batch(session_id, e, records)).await {
                    Some((back, written)) => {
                        encoder = back;
                        stats.add(written);
                    }
                    None => {
                        error!("[{}] {}", session_id, CaptureError::WriterStopped);
                        stats.dropped += count + drain(&mut receiver).await;
                        return stats;
                    }
                }
            }
            _ = flush.tick() => {
                match with_encoder(encoder, |e| e.flush()).await {
                    Some((back, flushed)) => {
                        encoder = back;
                        if let Err(e) = flushed {
                            warn!("[{}] {}", session_id, CaptureError::Write(e));
                        }
                        debug!("[{}] Flushed {} record(s)", session_id, stats.written);
                    }
                    None => {
                        error!("[{}] {}", session_id, CaptureError::WriterStopped);
                        stats.dropped += drain(&mut receiver).await;
                        return stats;
                    }
                }
            }
        }
    }

    match task::spawn_blocking(move || finalize(encoder)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("[{}] {}", session_id, CaptureError::Finalize(e)),
        Err(e) => error!("[{}] {}: {}", session_id, CaptureError::WriterStopped, e),
    }

    stats
}
