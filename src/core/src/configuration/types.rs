use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Remote game server the bot session connects to.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    /// Per-packet read timeout; also bounds the wait for login success.
    pub read_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: String::from("2b2t.org"),
            port: 25565,
            read_timeout_secs: 36,
            connect_timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Local listener spectators connect to.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: String,
    pub port: Option<u16>,
    pub compression_threshold: i32,
    /// Text shown in the spectator's server list.
    pub description: String,
    /// Verify spectators through the session server and encrypt their
    /// connections. When off, any name is accepted in the clear.
    pub online_mode: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: None,
            compression_threshold: 256,
            description: String::from("2b2t bot"),
            online_mode: true,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub dump_dir: PathBuf,
    pub flush_interval_secs: u64,
    /// Records buffered between the session and the dump writer before new
    /// records start being dropped.
    pub buffer_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("dumps"),
            flush_interval_secs: 10,
            buffer_capacity: 8192,
        }
    }
}

impl CaptureConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

#[derive(PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub server: String,
    /// Session server used for join registration and spectator verification.
    pub session_server: String,
    pub profile_path: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            server: String::from("https://authserver.mojang.com"),
            session_server: String::from("https://sessionserver.mojang.com"),
            profile_path: PathBuf::from(".profile.json"),
            username: None,
            password: None,
        }
    }
}

// Keeps the password out of debug logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("server", &self.server)
            .field("session_server", &self.session_server)
            .field("profile_path", &self.profile_path)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Fixed delays of the retry loops.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub auth_retry_secs: u64,
    pub connect_retry_secs: u64,
    pub quiescence_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            auth_retry_secs: 10,
            connect_retry_secs: 10,
            quiescence_secs: 2,
            shutdown_grace_secs: 2,
        }
    }
}

impl TimingConfig {
    pub fn auth_retry(&self) -> Duration {
        Duration::from_secs(self.auth_retry_secs)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_secs(self.connect_retry_secs)
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_secs(self.quiescence_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
