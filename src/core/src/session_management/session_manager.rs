use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::authentication::CredentialBundle;
use crate::configuration::{CaptureConfig, UpstreamConfig};
use crate::data_capture::PacketRecorder;
use crate::error_handling::types::TransportError;
use crate::protocol::{v340, Connector, NextState, Packet, PacketBuilder, PacketReader, UpstreamLink};
use crate::relay::{BotProfile, RelayFactory, RelaySlot};
use crate::session_management::active_session::ActiveSession;
use crate::session_management::session::{Session, SessionEnd, SessionReport};
use crate::session_management::SessionState;

/// The upstream session controller.
///
/// Drives one connection attempt at a time through the session state machine.
/// `run_session` takes `&mut self`, so a second session cannot be started while
/// one is in flight; the retry policy between attempts belongs to the caller.
///
/// # Fields Overview
///
/// - `connector`: opens the upstream link
/// - `relays`: builds the relay published for each steady-state session
/// - `slot`: where the relay is published for the gateway
/// - `upstream` / `capture`: remote endpoint and dump settings
/// - `state`: last state entered, observable through [`SessionManager::subscribe_state`]
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    relays: Arc<dyn RelayFactory>,
    slot: RelaySlot,
    upstream: UpstreamConfig,
    capture: CaptureConfig,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        relays: Arc<dyn RelayFactory>,
        slot: RelaySlot,
        upstream: UpstreamConfig,
        capture: CaptureConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            connector,
            relays,
            slot,
            upstream,
            capture,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Runs one full cycle: connect, log in, steady state, teardown.
    ///
    /// Returns `Err` when the session never reached steady state (connect or
    /// login failure, or shutdown during login), and a report once a
    /// steady-state session has been torn down. Either way the manager is back
    /// to `Idle` with no resource left open.
    pub async fn run_session(
        &mut self,
        bundle: &CredentialBundle,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionReport, TransportError> {
        let mut session = Session::new();
        self.set_state(&mut session, SessionState::Connecting);
        info!(
            "[{}] Connecting to {}:{} as {}",
            session.id, self.upstream.host, self.upstream.port, bundle.name
        );

        let mut link = match self
            .connector
            .connect(&self.upstream.host, self.upstream.port, bundle)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                error!("[{}] Connection failed: {}", session.id, e);
                self.set_state(&mut session, SessionState::Idle);
                return Err(e);
            }
        };

        let profile = match self.login(&mut session, link.as_mut(), bundle, shutdown).await {
            Ok(profile) => profile,
            Err(e) => {
                error!("[{}] Login failed: {}", session.id, e);
                link.close().await;
                self.set_state(&mut session, SessionState::Idle);
                return Err(e);
            }
        };

        let started_at = Utc::now();
        info!(
            "[{}] Logged in as {} ({})",
            session.id, profile.name, profile.uuid
        );

        let recorder = PacketRecorder::open(
            session.id,
            &self.capture.dump_dir,
            started_at,
            self.capture.flush_interval(),
            self.capture.buffer_capacity,
        );
        let relay = self.relays.create(session.id, profile.clone());
        let mut active = ActiveSession {
            session,
            link,
            recorder,
            relay: relay.clone(),
        };

        // no await between entering the state and publishing, nor between
        // unpublishing and leaving it
        self.set_state(&mut active.session, SessionState::SteadyState);
        self.slot.publish(relay);

        let end = Self::pump(&mut active, shutdown).await;

        self.slot.clear();
        self.set_state(&mut active.session, SessionState::Closing);
        match &end {
            SessionEnd::RemoteClosed => warn!("[{}] Upstream closed the connection", active.session.id),
            SessionEnd::TransportFailed(e) => error!("[{}] Upstream failed: {}", active.session.id, e),
            SessionEnd::ShutdownRequested => info!("[{}] Shutting the session down", active.session.id),
        }

        let ActiveSession {
            mut session,
            mut link,
            recorder,
            relay,
        } = active;
        relay.shutdown().await;
        link.close().await;
        let dump = recorder.finish().await;
        self.set_state(&mut session, SessionState::Idle);

        let report = SessionReport {
            session_id: session.id,
            profile,
            started_at,
            ended_at: Utc::now(),
            packets_received: session.packets_received,
            end,
            dump,
        };
        info!(
            "[{}] Session lasted {}s, {} packet(s) received, {} dropped from the dump",
            report.session_id,
            (report.ended_at - report.started_at).num_seconds(),
            report.packets_received,
            report.dump.records_dropped
        );
        Ok(report)
    }

    async fn login(
        &self,
        session: &mut Session,
        link: &mut dyn UpstreamLink,
        bundle: &CredentialBundle,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<BotProfile, TransportError> {
        let handshake = PacketBuilder::new(v340::handshake::HANDSHAKE)
            .write_varint(v340::PROTOCOL_VERSION)
            .write_string(&self.upstream.host)
            .write_u16(self.upstream.port)
            .write_varint(NextState::Login.to_wire())
            .build();
        link.send(handshake).await?;
        link.send(
            PacketBuilder::new(v340::login::LOGIN_START)
                .write_string(&bundle.name)
                .build(),
        )
        .await?;
        self.set_state(session, SessionState::AwaitingLoginResult);

        loop {
            let inbound = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => {
                    info!("[{}] Shutdown requested during login", session.id);
                    return Err(TransportError::Closed);
                }
                inbound = link.recv() => inbound,
            };

            match inbound {
                Some(Ok(packet)) if packet.id() == v340::login::SUCCESS => {
                    return parse_login_success(&packet);
                }
                Some(Ok(packet)) => debug!(
                    "[{}] Ignoring packet 0x{:02x} while awaiting the login result",
                    session.id,
                    packet.id()
                ),
                Some(Err(e)) => return Err(e),
                None => return Err(TransportError::Closed),
            }
        }
    }

    async fn pump(active: &mut ActiveSession, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        loop {
            let inbound = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return SessionEnd::ShutdownRequested,
                inbound = active.link.recv() => inbound,
            };

            match inbound {
                Some(Ok(packet)) => {
                    if let Err(e) = active.dispatch(packet).await {
                        return SessionEnd::TransportFailed(e.to_string());
                    }
                }
                Some(Err(e)) => return SessionEnd::TransportFailed(e.to_string()),
                None => return SessionEnd::RemoteClosed,
            }
        }
    }

    fn set_state(&self, session: &mut Session, state: SessionState) {
        let previous = std::mem::replace(&mut session.state, state);
        self.state.send_replace(state);
        info!("[{}] {} -> {}", session.id, previous, state);
    }
}

fn parse_login_success(packet: &Packet) -> Result<BotProfile, TransportError> {
    let mut reader = PacketReader::new(packet);
    let uuid = reader.read_string()?;
    let name = reader.read_string()?;
    Ok(BotProfile { uuid, name })
}

/// Resolves once the exiting flag is set, or once nobody can set it anymore.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|exiting| *exiting).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::{SelectedProfile, SessionService};
    use crate::data_capture::read_records;
    use crate::error_handling::types::AuthError;
    use crate::protocol::encryption::{server_hash, EncryptionRequest, EncryptionResponse, ServerKeyPair};
    use crate::protocol::{Connection, TcpConnector};
    use crate::relay::{Relay, Spectator};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    enum LinkEvent {
        Received(i32),
        Sent(Packet),
        Closed,
    }

    struct ScriptedLink {
        inbound: mpsc::UnboundedReceiver<Result<Packet, TransportError>>,
        events: Arc<Mutex<Vec<LinkEvent>>>,
    }

    #[async_trait]
    impl UpstreamLink for ScriptedLink {
        async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
            self.events.lock().unwrap().push(LinkEvent::Sent(packet));
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<Packet, TransportError>> {
            let inbound = self.inbound.recv().await;
            if let Some(Ok(packet)) = &inbound {
                self.events.lock().unwrap().push(LinkEvent::Received(packet.id()));
            }
            inbound
        }

        async fn close(&mut self) {
            self.events.lock().unwrap().push(LinkEvent::Closed);
        }
    }

    #[derive(Default)]
    struct ScriptedConnector {
        links: Mutex<VecDeque<ScriptedLink>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            _host: &str,
            _port: u16,
            _bundle: &CredentialBundle,
        ) -> Result<Box<dyn UpstreamLink>, TransportError> {
            match self.links.lock().unwrap().pop_front() {
                Some(link) => Ok(Box::new(link)),
                None => Err(TransportError::ConnectFailed(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                ))),
            }
        }
    }

    struct FakeRelay {
        slot: RelaySlot,
        forwarded: Mutex<Vec<Packet>>,
        published_at_shutdown: Mutex<Option<bool>>,
    }

    #[async_trait]
    impl Relay for FakeRelay {
        fn forward(&self, packet: Arc<Packet>) {
            self.forwarded.lock().unwrap().push((*packet).clone());
        }

        fn attach(&self, _spectator: Spectator) {}

        async fn shutdown(&self) {
            *self.published_at_shutdown.lock().unwrap() = Some(self.slot.is_published());
        }

        fn spectator_count(&self) -> usize {
            0
        }
    }

    struct FakeRelayFactory {
        slot: RelaySlot,
        created: Mutex<Vec<(BotProfile, Arc<FakeRelay>)>>,
    }

    impl RelayFactory for FakeRelayFactory {
        fn create(&self, _session_id: uuid::Uuid, profile: BotProfile) -> Arc<dyn Relay> {
            let relay = Arc::new(FakeRelay {
                slot: self.slot.clone(),
                forwarded: Mutex::new(Vec::new()),
                published_at_shutdown: Mutex::new(None),
            });
            self.created.lock().unwrap().push((profile, relay.clone()));
            relay
        }
    }

    struct Harness {
        manager: SessionManager,
        slot: RelaySlot,
        relays: Arc<FakeRelayFactory>,
        connector: Arc<ScriptedConnector>,
        shutdown_tx: watch::Sender<bool>,
        shutdown_rx: watch::Receiver<bool>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let dir = tempfile::tempdir().unwrap();
            let slot = RelaySlot::new();
            let relays = Arc::new(FakeRelayFactory {
                slot: slot.clone(),
                created: Mutex::new(Vec::new()),
            });
            let connector = Arc::new(ScriptedConnector::default());
            let capture = CaptureConfig {
                dump_dir: dir.path().to_path_buf(),
                ..CaptureConfig::default()
            };
            let manager = SessionManager::new(
                connector.clone(),
                relays.clone(),
                slot.clone(),
                UpstreamConfig::default(),
                capture,
            );
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            Self {
                manager,
                slot,
                relays,
                connector,
                shutdown_tx,
                shutdown_rx,
                dir,
            }
        }

        fn add_link(
            &self,
        ) -> (
            mpsc::UnboundedSender<Result<Packet, TransportError>>,
            Arc<Mutex<Vec<LinkEvent>>>,
        ) {
            let (tx, inbound) = mpsc::unbounded_channel();
            let events = Arc::new(Mutex::new(Vec::new()));
            self.connector.links.lock().unwrap().push_back(ScriptedLink {
                inbound,
                events: events.clone(),
            });
            (tx, events)
        }

        fn relay(&self, index: usize) -> Arc<FakeRelay> {
            self.relays.created.lock().unwrap()[index].1.clone()
        }
    }

    fn bundle() -> CredentialBundle {
        CredentialBundle::new("abc", "Bot", "token")
    }

    fn login_success() -> Packet {
        PacketBuilder::new(v340::login::SUCCESS)
            .write_string("069a79f4-44e9-4726-a5be-fca90e38aaf5")
            .write_string("Bot")
            .build()
    }

    fn position_and_look(teleport_id: i32) -> Packet {
        let mut payload = vec![0u8; v340::play::POSITION_TELEPORT_ID_OFFSET];
        crate::protocol::codec::write_varint(&mut payload, teleport_id);
        Packet::new(v340::play::POSITION_AND_LOOK, &payload)
    }

    #[tokio::test]
    async fn test_full_cycle_answers_keep_alive_before_next_packet() {
        let mut h = Harness::new();
        let (upstream, events) = h.add_link();

        let chunk = Packet::new(0x20, b"chunk");
        upstream.send(Ok(Packet::new(0x04, b"noise"))).unwrap();
        upstream.send(Ok(login_success())).unwrap();
        upstream.send(Ok(position_and_look(7))).unwrap();
        upstream.send(Ok(chunk.clone())).unwrap();
        drop(upstream);

        let report = h
            .manager
            .run_session(&bundle(), &mut h.shutdown_rx)
            .await
            .unwrap();

        assert_eq!(report.end, SessionEnd::RemoteClosed);
        assert_eq!(report.packets_received, 2);
        assert_eq!(report.profile.name, "Bot");
        assert_eq!(h.manager.state(), SessionState::Idle);

        let events = events.lock().unwrap().clone();
        let handshake = match &events[0] {
            LinkEvent::Sent(packet) => packet.clone(),
            other => panic!("expected handshake, got {:?}", other),
        };
        let mut reader = PacketReader::new(&handshake);
        assert_eq!(reader.read_varint().unwrap(), 340);
        assert_eq!(reader.read_string().unwrap(), "2b2t.org");
        assert_eq!(reader.read_u16().unwrap(), 25565);
        assert_eq!(reader.read_varint().unwrap(), 2);
        match &events[1] {
            LinkEvent::Sent(packet) => {
                assert_eq!(packet.id(), v340::login::LOGIN_START);
                assert_eq!(PacketReader::new(packet).read_string().unwrap(), "Bot");
            }
            other => panic!("expected login start, got {:?}", other),
        }

        let confirm = PacketBuilder::new(v340::play::TELEPORT_CONFIRM)
            .write_varint(7)
            .build();
        assert_eq!(
            &events[2..],
            &[
                LinkEvent::Received(0x04),
                LinkEvent::Received(v340::login::SUCCESS),
                LinkEvent::Received(v340::play::POSITION_AND_LOOK),
                LinkEvent::Sent(confirm),
                LinkEvent::Received(0x20),
                LinkEvent::Closed,
            ]
        );

        let relay = h.relay(0);
        assert_eq!(
            *relay.forwarded.lock().unwrap(),
            vec![position_and_look(7), chunk.clone()]
        );
        assert_eq!(*relay.published_at_shutdown.lock().unwrap(), Some(false));
        assert!(!h.slot.is_published());

        let records = read_records(&report.dump.path).unwrap();
        let bytes: Vec<Vec<u8>> = records.into_iter().map(|r| r.bytes).collect();
        assert_eq!(bytes, vec![position_and_look(7).raw().to_vec(), chunk.raw().to_vec()]);
        assert!(report.dump.path.starts_with(h.dir.path()));
    }

    #[tokio::test]
    async fn test_relay_is_published_only_in_steady_state() {
        let h = Harness::new();
        let (upstream, _events) = h.add_link();
        let mut states = h.manager.subscribe_state();
        let slot = h.slot.clone();
        let shutdown_tx = h.shutdown_tx;
        let mut shutdown_rx = h.shutdown_rx;
        let mut manager = h.manager;

        let run = tokio::spawn(async move { manager.run_session(&bundle(), &mut shutdown_rx).await });

        states
            .wait_for(|s| *s == SessionState::AwaitingLoginResult)
            .await
            .unwrap();
        assert!(!slot.is_published());

        upstream.send(Ok(login_success())).unwrap();
        states
            .wait_for(|s| *s == SessionState::SteadyState)
            .await
            .unwrap();
        assert!(slot.is_published());

        shutdown_tx.send(true).unwrap();
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.end, SessionEnd::ShutdownRequested);
        assert!(!slot.is_published());
        assert_eq!(*states.borrow(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_login_rejection_returns_to_idle_without_relay_or_dump() {
        let mut h = Harness::new();
        let (upstream, events) = h.add_link();
        upstream
            .send(Err(TransportError::LoginRejected(String::from("banned"))))
            .unwrap();

        let result = h.manager.run_session(&bundle(), &mut h.shutdown_rx).await;

        assert!(matches!(result, Err(TransportError::LoginRejected(_))));
        assert_eq!(events.lock().unwrap().last(), Some(&LinkEvent::Closed));
        assert!(h.relays.created.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
        assert_eq!(h.manager.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let mut h = Harness::new();

        let result = h.manager.run_session(&bundle(), &mut h.shutdown_rx).await;

        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
        assert_eq!(h.manager.state(), SessionState::Idle);
        assert!(!h.slot.is_published());
    }

    #[tokio::test]
    async fn test_runtime_error_ends_session_with_report() {
        let mut h = Harness::new();
        let (upstream, _events) = h.add_link();
        upstream.send(Ok(login_success())).unwrap();
        upstream.send(Ok(Packet::new(0x20, b"a"))).unwrap();
        upstream.send(Err(TransportError::Timeout)).unwrap();

        let report = h
            .manager
            .run_session(&bundle(), &mut h.shutdown_rx)
            .await
            .unwrap();

        assert!(matches!(report.end, SessionEnd::TransportFailed(_)));
        assert_eq!(report.dump.records_written, 1);
        // the sender is still alive: teardown does not depend on the remote
        drop(upstream);
    }

    /// Accepts every join and remembers it.
    #[derive(Default)]
    struct AcceptingSessions {
        joins: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SessionService for AcceptingSessions {
        async fn join(&self, bundle: &CredentialBundle, server_hash: &str) -> Result<(), AuthError> {
            self.joins
                .lock()
                .unwrap()
                .push((bundle.id.clone(), server_hash.to_string()));
            Ok(())
        }

        async fn has_joined(
            &self,
            _name: &str,
            _server_hash: &str,
        ) -> Result<Option<SelectedProfile>, AuthError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_encrypted_login_reaches_steady_state_over_tcp() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let keys = ServerKeyPair::generate().unwrap();
        let public_key = keys.public_der().to_vec();

        // an online-mode server: encryption, then compression, then play
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream);
            assert_eq!(conn.read_packet().await.unwrap().id(), v340::handshake::HANDSHAKE);
            let start = conn.read_packet().await.unwrap();
            assert_eq!(PacketReader::new(&start).read_string().unwrap(), "Bot");

            let request = EncryptionRequest {
                server_id: String::new(),
                public_key: keys.public_der().to_vec(),
                verify_token: vec![4, 3, 2, 1],
            };
            conn.write_packet(&request.to_packet()).await.unwrap();
            let response = EncryptionResponse::parse(&conn.read_packet().await.unwrap()).unwrap();
            let secret = keys.decrypt(&response.shared_secret).unwrap();
            assert_eq!(keys.decrypt(&response.verify_token).unwrap(), vec![4, 3, 2, 1]);
            conn.enable_encryption(&secret).unwrap();

            conn.write_packet(&PacketBuilder::new(v340::login::SET_COMPRESSION).write_varint(256).build())
                .await
                .unwrap();
            conn.set_compression(Some(256));
            conn.write_packet(&login_success()).await.unwrap();
            conn.write_packet(&position_and_look(11)).await.unwrap();
            let confirm = conn.read_packet().await.unwrap();
            conn.write_packet(&Packet::new(0x20, &vec![5u8; 1024])).await.unwrap();
            (secret, confirm)
        });

        let sessions = Arc::new(AcceptingSessions::default());
        let connector = Arc::new(TcpConnector::new(
            Duration::from_secs(5),
            Duration::from_secs(5),
            sessions.clone(),
        ));
        let slot = RelaySlot::new();
        let relays = Arc::new(FakeRelayFactory {
            slot: slot.clone(),
            created: Mutex::new(Vec::new()),
        });
        let upstream = UpstreamConfig {
            host: String::from("127.0.0.1"),
            port,
            ..UpstreamConfig::default()
        };
        let capture = CaptureConfig {
            dump_dir: dir.path().to_path_buf(),
            ..CaptureConfig::default()
        };
        let mut manager = SessionManager::new(connector, relays.clone(), slot, upstream, capture);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let report = manager.run_session(&bundle(), &mut shutdown_rx).await.unwrap();
        let (secret, confirm) = server.await.unwrap();

        assert_eq!(report.end, SessionEnd::RemoteClosed);
        assert_eq!(report.packets_received, 2);
        assert_eq!(report.profile.name, "Bot");
        assert_eq!(
            confirm,
            PacketBuilder::new(v340::play::TELEPORT_CONFIRM).write_varint(11).build()
        );
        assert_eq!(
            *sessions.joins.lock().unwrap(),
            vec![(String::from("abc"), server_hash("", &secret, &public_key))]
        );

        let records = read_records(&report.dump.path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].bytes, position_and_look(11).raw().to_vec());
        assert_eq!(relays.created.lock().unwrap().len(), 1);
    }
}
