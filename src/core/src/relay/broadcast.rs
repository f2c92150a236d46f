//! In-process relay built on a tokio broadcast channel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use serde_json::json;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use super::types::{BotProfile, Relay, RelayFactory, Spectator, SpectatorStream};
use crate::error_handling::types::TransportError;
use crate::protocol::codec::PacketBuilder;
use crate::protocol::connection::{FrameReader, FrameWriter};
use crate::protocol::{v340, Packet};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_BACKLOG_LIMIT: usize = 256;

/// Time spectators get to receive their disconnect on shutdown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
enum RelayEvent {
    Packet(Arc<Packet>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedEnd {
    SessionClosed,
    Lagged(u64),
}

/// First packets of the session, replayed to late joiners so their client sees
/// the join sequence before live traffic.
struct Backlog {
    packets: Vec<Arc<Packet>>,
    limit: usize,
}

pub struct BroadcastRelay {
    session_id: Uuid,
    profile: BotProfile,
    sender: broadcast::Sender<RelayEvent>,
    // held while forwarding so attach sees backlog and subscription atomically
    backlog: Mutex<Backlog>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    attached: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl BroadcastRelay {
    pub fn new(session_id: Uuid, profile: BotProfile, capacity: usize, backlog_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            session_id,
            profile,
            sender,
            backlog: Mutex::new(Backlog {
                packets: Vec::new(),
                limit: backlog_limit,
            }),
            tasks: Mutex::new(Vec::new()),
            attached: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Relay for BroadcastRelay {
    fn forward(&self, packet: Arc<Packet>) {
        let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
        if backlog.packets.len() < backlog.limit {
            backlog.packets.push(packet.clone());
        }
        // no receivers is fine
        let _ = self.sender.send(RelayEvent::Packet(packet));
    }

    fn attach(&self, spectator: Spectator) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("[{}] Relay closed, turning {} away", self.session_id, spectator.name);
            tokio::spawn(turn_away(spectator));
            return;
        }

        let (replay, events) = {
            let backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
            (backlog.packets.clone(), self.sender.subscribe())
        };

        info!(
            "[{}] Spectator {} ({}) attached",
            self.session_id, spectator.name, spectator.peer
        );
        let attached = self.attached.clone();
        attached.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(serve_spectator(
            self.session_id,
            self.profile.clone(),
            spectator,
            replay,
            events,
            attached,
        ));

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.send(RelayEvent::Shutdown);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        let deadline = Instant::now() + SHUTDOWN_WAIT;
        for mut task in tasks {
            if timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
            }
        }
        info!("[{}] Relay shut down", self.session_id);
    }

    fn spectator_count(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
}

async fn serve_spectator(
    session_id: Uuid,
    profile: BotProfile,
    spectator: Spectator,
    replay: Vec<Arc<Packet>>,
    events: broadcast::Receiver<RelayEvent>,
    attached: Arc<AtomicUsize>,
) {
    let name = spectator.name;
    let (reader, mut writer) = spectator.connection.into_split();

    let outcome = tokio::select! {
        result = feed(&mut writer, &profile, replay, events) => Some(result),
        _ = drain(reader) => None,
    };

    match outcome {
        Some(Ok(FeedEnd::SessionClosed)) => {
            debug!("[{}] Disconnecting spectator {}", session_id, name);
            send_disconnect(&mut writer, "bot disconnected").await;
        }
        Some(Ok(FeedEnd::Lagged(missed))) => {
            warn!(
                "[{}] Spectator {} fell {} packet(s) behind, dropping it",
                session_id, name, missed
            );
            send_disconnect(&mut writer, "spectator fell behind").await;
        }
        Some(Err(e)) => debug!("[{}] Spectator {} write failed: {}", session_id, name, e),
        None => info!("[{}] Spectator {} left", session_id, name),
    }

    let _ = writer.shutdown().await;
    attached.fetch_sub(1, Ordering::SeqCst);
}

async fn feed(
    writer: &mut FrameWriter<WriteHalf<SpectatorStream>>,
    profile: &BotProfile,
    replay: Vec<Arc<Packet>>,
    mut events: broadcast::Receiver<RelayEvent>,
) -> Result<FeedEnd, TransportError> {
    let login_success = PacketBuilder::new(v340::login::SUCCESS)
        .write_string(&profile.uuid)
        .write_string(&profile.name)
        .build();
    writer.write_packet(&login_success).await?;

    for packet in replay {
        writer.write_packet(&packet).await?;
    }

    loop {
        match events.recv().await {
            Ok(RelayEvent::Packet(packet)) => writer.write_packet(&packet).await?,
            Ok(RelayEvent::Shutdown) | Err(RecvError::Closed) => return Ok(FeedEnd::SessionClosed),
            Err(RecvError::Lagged(missed)) => return Ok(FeedEnd::Lagged(missed)),
        }
    }
}

/// Spectators are read-only; whatever they send is discarded.
async fn drain(mut reader: FrameReader<ReadHalf<SpectatorStream>>) {
    while let Ok(packet) = reader.read_packet().await {
        trace!("discarding spectator packet 0x{:02x}", packet.id());
    }
}

async fn send_disconnect(writer: &mut FrameWriter<WriteHalf<SpectatorStream>>, text: &str) {
    let packet = match PacketBuilder::new(v340::play::DISCONNECT).write_json(&json!({ "text": text })) {
        Ok(builder) => builder.build(),
        Err(_) => return,
    };
    let _ = writer.write_packet(&packet).await;
}

async fn turn_away(spectator: Spectator) {
    let (_, mut writer) = spectator.connection.into_split();
    if let Ok(builder) =
        PacketBuilder::new(v340::login::DISCONNECT).write_json(&json!({ "text": "bot disconnected" }))
    {
        let _ = writer.write_packet(&builder.build()).await;
    }
    let _ = writer.shutdown().await;
}

/// Creates a [`BroadcastRelay`] per session.
#[derive(Debug, Clone)]
pub struct BroadcastRelayFactory {
    capacity: usize,
    backlog_limit: usize,
}

impl BroadcastRelayFactory {
    pub fn new(capacity: usize, backlog_limit: usize) -> Self {
        Self {
            capacity,
            backlog_limit,
        }
    }
}

impl Default for BroadcastRelayFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, DEFAULT_BACKLOG_LIMIT)
    }
}

impl RelayFactory for BroadcastRelayFactory {
    fn create(&self, session_id: Uuid, profile: BotProfile) -> Arc<dyn Relay> {
        Arc::new(BroadcastRelay::new(
            session_id,
            profile,
            self.capacity,
            self.backlog_limit,
        ))
    }
}
