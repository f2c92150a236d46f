use std::fs;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;

use crate::authentication::{
    AccountCredentials, Authenticator, CredentialManager, MojangSessionService,
    YggdrasilAuthenticator,
};
use crate::configuration::config::Config;
use crate::configuration::TimingConfig;
use crate::error_handling::types::*;
use crate::network::{OfflineLogin, OnlineLogin, SpectatorGateway, SpectatorLogin};
use crate::protocol::{Connector, TcpConnector};
use crate::relay::{BroadcastRelayFactory, RelayFactory, RelaySlot};
use crate::session_management::SessionManager;
use crate::storage::{CredentialStore, FileCredentialStore};

/// The process lifecycle coordinator.
///
/// Owns the retry loop that chains credential acquisition and upstream
/// sessions forever, the spectator gateway, and the process-wide exiting flag.
pub struct Controller {
    config: Config,
    credentials: CredentialManager,
    sessions: SessionManager,
    slot: RelaySlot,
    login: Arc<dyn SpectatorLogin>,
    exiting: watch::Sender<bool>,
}

impl Controller {
    /// Wires the production components from `config`.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        let authenticator = YggdrasilAuthenticator::new(config.auth.server.clone())
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        let sessions = Arc::new(
            MojangSessionService::new(config.auth.session_server.clone())
                .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?,
        );
        let store = FileCredentialStore::new(&config.auth.profile_path);
        let connector = TcpConnector::new(
            config.upstream.connect_timeout(),
            config.upstream.read_timeout(),
            sessions.clone(),
        );
        let login: Arc<dyn SpectatorLogin> = if config.gateway.online_mode {
            Arc::new(OnlineLogin::new(sessions)?)
        } else {
            warn!("Spectator gateway runs in offline mode, names are not verified");
            Arc::new(OfflineLogin)
        };

        Ok(Self::with_components(
            config,
            Arc::new(authenticator),
            Arc::new(store),
            Arc::new(connector),
            Arc::new(BroadcastRelayFactory::default()),
            login,
        ))
    }

    pub fn with_components(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
        relays: Arc<dyn RelayFactory>,
        login: Arc<dyn SpectatorLogin>,
    ) -> Self {
        let account = match (&config.auth.username, &config.auth.password) {
            (Some(username), Some(password)) => Some(AccountCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let slot = RelaySlot::new();
        let sessions = SessionManager::new(
            connector,
            relays,
            slot.clone(),
            config.upstream.clone(),
            config.capture.clone(),
        );
        let (exiting, _) = watch::channel(false);

        Self {
            credentials: CredentialManager::new(authenticator, store, account),
            sessions,
            slot,
            login,
            exiting,
            config,
        }
    }

    /// Sender side of the exiting flag; setting it to `true` stops the loop.
    pub fn exit_handle(&self) -> watch::Sender<bool> {
        self.exiting.clone()
    }

    pub fn relay_slot(&self) -> RelaySlot {
        self.slot.clone()
    }

    /// Starts the gateway and runs the session loop until the exiting flag is set.
    ///
    /// Only startup problems are returned: an unusable dump directory or a
    /// gateway that cannot bind. Everything after that is retried.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        fs::create_dir_all(&self.config.capture.dump_dir).map_err(|e| {
            ControllerError::InitializationFailed(format!(
                "unable to create {}: {}",
                self.config.capture.dump_dir.display(),
                e
            ))
        })?;

        let port = self
            .config
            .listen_port()
            .ok_or(ControllerError::ConfigurationError(ConfigError::MissingListenPort))?;
        let gateway = SpectatorGateway::bind(
            &self.config.gateway,
            port,
            self.slot.clone(),
            self.login.clone(),
        )
        .await?;
        let gateway_task = tokio::spawn(gateway.run(self.exiting.subscribe()));

        self.session_loop().await;

        let _ = gateway_task.await;
        info!("Controller stopped");
        Ok(())
    }

    async fn session_loop(&mut self) {
        let timing: TimingConfig = self.config.timing.clone();
        let mut exiting = self.exiting.subscribe();
        let mut previous = self.credentials.load_persisted();

        while !*exiting.borrow() {
            let bundle = match self.credentials.obtain(previous.clone()).await {
                Ok(bundle) => bundle,
                Err(e) => {
                    error!("Unable to obtain credentials: {}", e);
                    warn!("Retrying authentication in {:?}", timing.auth_retry());
                    sleep_or_exit(timing.auth_retry(), &mut exiting).await;
                    continue;
                }
            };
            if *exiting.borrow() {
                break;
            }

            match self.sessions.run_session(&bundle, &mut exiting).await {
                Ok(_report) => {
                    // the bundle is stale now; start over from what is persisted
                    previous = self.credentials.load_persisted();
                    sleep_or_exit(timing.quiescence(), &mut exiting).await;
                }
                Err(e) => {
                    warn!("Session failed ({}), reconnecting in {:?}", e, timing.connect_retry());
                    previous = Some(bundle);
                    sleep_or_exit(timing.connect_retry(), &mut exiting).await;
                }
            }
        }
    }
}

/// Sleeps for `delay`, cut short when the exiting flag is raised.
async fn sleep_or_exit(delay: Duration, exiting: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = exiting.wait_for(|exiting| *exiting) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::CredentialBundle;
    use crate::protocol::{v340, Packet, PacketBuilder, UpstreamLink};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct FlakyAuthenticator {
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl Authenticator for FlakyAuthenticator {
        async fn validate(&self, _access_token: &str) -> Result<bool, AuthError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(AuthError::Network(String::from("down")));
            }
            Ok(true)
        }

        async fn refresh(&self, _access_token: &str) -> Result<CredentialBundle, AuthError> {
            Err(AuthError::Network(String::from("down")))
        }

        async fn authenticate(&self, _account: &AccountCredentials) -> Result<CredentialBundle, AuthError> {
            Err(AuthError::Network(String::from("down")))
        }
    }

    struct MemStore(Mutex<Option<CredentialBundle>>);

    impl CredentialStore for MemStore {
        fn load(&self) -> Result<Option<CredentialBundle>, StorageError> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn save(&self, bundle: &CredentialBundle) -> Result<(), StorageError> {
            *self.0.lock().unwrap() = Some(bundle.clone());
            Ok(())
        }
    }

    /// Logs in and immediately closes.
    struct OneShotLink {
        inbound: VecDeque<Packet>,
    }

    #[async_trait]
    impl UpstreamLink for OneShotLink {
        async fn send(&mut self, _packet: Packet) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<Packet, TransportError>> {
            self.inbound.pop_front().map(Ok)
        }

        async fn close(&mut self) {}
    }

    /// Refuses `failures` connects, then accepts one, then raises the exiting flag.
    struct CountingConnector {
        failures: usize,
        attempts: Mutex<Vec<Instant>>,
        exiting: watch::Sender<bool>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(
            &self,
            _host: &str,
            _port: u16,
            _bundle: &CredentialBundle,
        ) -> Result<Box<dyn UpstreamLink>, TransportError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len()
            };

            if attempt <= self.failures {
                return Err(TransportError::ConnectFailed(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )));
            }
            if attempt > self.failures + 1 {
                self.exiting.send_replace(true);
                return Err(TransportError::Closed);
            }

            let success = PacketBuilder::new(v340::login::SUCCESS)
                .write_string("069a79f4-44e9-4726-a5be-fca90e38aaf5")
                .write_string("Bot")
                .build();
            Ok(Box::new(OneShotLink {
                inbound: VecDeque::from(vec![success, Packet::new(0x23, b"join")]),
            }))
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.gateway.bind_address = String::from("127.0.0.1");
        config.gateway.port = Some(0);
        config.capture.dump_dir = dir.join("dumps");
        config
    }

    fn controller(
        dir: &std::path::Path,
        auth_failures: u32,
        connect_failures: usize,
    ) -> (Controller, Arc<CountingConnector>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(MemStore(Mutex::new(Some(CredentialBundle::new(
            "abc", "Bot", "token",
        )))));
        let authenticator = Arc::new(FlakyAuthenticator {
            failures_left: Mutex::new(auth_failures),
        });
        // the connector needs the flag before the controller exists
        let (exiting, _) = watch::channel(false);
        let connector = Arc::new(CountingConnector {
            failures: connect_failures,
            attempts: Mutex::new(Vec::new()),
            exiting: exiting.clone(),
        });

        let mut controller = Controller::with_components(
            test_config(dir),
            authenticator,
            store,
            connector.clone(),
            Arc::new(BroadcastRelayFactory::default()),
            Arc::new(OfflineLogin),
        );
        controller.exiting = exiting;
        (controller, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_are_retried_every_ten_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, connector) = controller(dir.path(), 0, 3);

        controller.run().await.unwrap();

        let attempts = connector.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 5);
        for pair in attempts[..4].windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(10), "gap {:?}", gap);
            assert!(gap < Duration::from_secs(11), "gap {:?}", gap);
        }
        // after a finished session only the quiescence delay applies
        let gap = attempts[4] - attempts[3];
        assert!(gap >= Duration::from_secs(2) && gap < Duration::from_secs(3), "gap {:?}", gap);

        assert!(dir.path().join("dumps").is_dir());
        assert!(!controller.relay_slot().is_published());
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_failure_is_retried_after_delay() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, connector) = controller(dir.path(), 1, 0);
        let started = Instant::now();

        controller.run().await.unwrap();

        let attempts = connector.attempts.lock().unwrap().clone();
        assert!(attempts[0] - started >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_flag_stops_the_loop_without_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, connector) = controller(dir.path(), 0, 0);
        controller.exit_handle().send_replace(true);

        controller.run().await.unwrap();

        assert!(connector.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_listen_port_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _connector) = controller(dir.path(), 0, 0);
        controller.config.gateway.port = None;

        assert!(matches!(
            controller.run().await,
            Err(ControllerError::ConfigurationError(ConfigError::MissingListenPort))
        ));
    }
}
