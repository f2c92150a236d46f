use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Command-line arguments of the daemon.
///
/// Every argument can also be supplied through the environment, which is how the
/// daemon is normally deployed:
/// - `MOJANG_USER` / `MOJANG_PASS`: identity-provider credentials, only needed when
///   no persisted credential bundle can be validated or refreshed
/// - `PROXY_PORT`: local port of the spectator gateway (required)
///
/// Everything else lives in the optional TOML file passed with `--config`.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vigil")]
#[command(version)]
#[command(about = "Keeps one bot session alive, records it and lets spectators watch")]
pub struct Args {
    /// Optional TOML configuration file
    ///
    /// # Command Line
    /// Use `--config <PATH>` to set this value from the CLI
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Identity-provider username
    ///
    /// # Command Line
    /// Use `--username <NAME>` or the `MOJANG_USER` environment variable
    #[arg(long, env = "MOJANG_USER")]
    pub username: Option<String>,

    /// Identity-provider password
    ///
    /// # Command Line
    /// Use `--password <PASSWORD>` or the `MOJANG_PASS` environment variable
    #[arg(long, env = "MOJANG_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Port on which the spectator gateway listens
    ///
    /// # Command Line
    /// Use `--listen-port <PORT>` or the `PROXY_PORT` environment variable
    #[arg(long, env = "PROXY_PORT")]
    pub listen_port: Option<u16>,
}

/// Application configuration structure that defines all runtime parameters.
///
/// Built from three layers, each overriding the previous one: built-in defaults,
/// the TOML file named by `--config`, then command-line arguments and environment
/// variables.
///
/// # Fields Overview
///
/// - `upstream`: remote server address and transport timeouts
/// - `gateway`: local spectator listener
/// - `capture`: dump directory and flush policy
/// - `auth`: identity provider, persisted profile path and credentials
/// - `timing`: fixed retry, quiescence and shutdown delays
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub gateway: GatewayConfig,
    pub capture: CaptureConfig,
    pub auth: AuthConfig,
    pub timing: TimingConfig,
}

impl Config {
    /// Parses a TOML configuration file. Missing sections and keys fall back to
    /// their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration file {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Merges defaults, the optional file and the arguments, then validates the result.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(port) = args.listen_port {
            config.gateway.port = Some(port);
        }
        if args.username.is_some() {
            config.auth.username = args.username.clone();
        }
        if args.password.is_some() {
            config.auth.password = args.password.clone();
        }

        config.validate()?;
        info!(
            "Configuration loaded: upstream={}:{}, gateway={}:{}, dumps={}",
            config.upstream.host,
            config.upstream.port,
            config.gateway.bind_address,
            config.listen_port().unwrap_or_default(),
            config.capture.dump_dir.display()
        );
        Ok(config)
    }

    /// Gateway port; `None` only before validation.
    pub fn listen_port(&self) -> Option<u16> {
        self.gateway.port
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.port.is_none() {
            return Err(ConfigError::MissingListenPort);
        }
        if self.upstream.host.is_empty() {
            return Err(ConfigError::InvalidValue(String::from("upstream.host is empty")));
        }
        if self.capture.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "capture.buffer_capacity must be at least 1",
            )));
        }
        if self.capture.flush_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "capture.flush_interval_secs must be at least 1",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_fixed_policy() {
        let config = Config::default();
        assert_eq!(config.upstream.host, "2b2t.org");
        assert_eq!(config.upstream.port, 25565);
        assert_eq!(config.gateway.compression_threshold, 256);
        assert_eq!(config.capture.flush_interval_secs, 10);
        assert_eq!(config.timing.auth_retry_secs, 10);
        assert_eq!(config.timing.connect_retry_secs, 10);
        assert_eq!(config.timing.quiescence_secs, 2);
        assert_eq!(config.timing.shutdown_grace_secs, 2);
        assert!(config.gateway.online_mode);
        assert_eq!(config.auth.session_server, "https://sessionserver.mojang.com");
    }

    #[test]
    fn test_gateway_can_be_switched_to_offline_mode() {
        let config = Config::from_toml_str("[gateway]\nonline_mode = false\n").unwrap();
        assert!(!config.gateway.online_mode);
        assert_eq!(config.gateway.compression_threshold, 256);
    }

    #[test]
    fn test_missing_listen_port_is_fatal() {
        let args = Args::default();
        match Config::load(&args) {
            Err(ConfigError::MissingListenPort) => {}
            other => panic!("expected MissingListenPort, got {:?}", other),
        }
    }

    #[test]
    fn test_file_values_are_overridden_by_args() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[upstream]
host = "play.example.org"

[gateway]
port = 25000

[auth]
username = "from-file"
"#
        )
        .unwrap();

        let args = Args {
            config: Some(file.path().to_path_buf()),
            username: Some(String::from("from-args")),
            password: None,
            listen_port: Some(25001),
        };

        let config = Config::load(&args).unwrap();
        assert_eq!(config.upstream.host, "play.example.org");
        assert_eq!(config.upstream.port, 25565);
        assert_eq!(config.listen_port(), Some(25001));
        assert_eq!(config.auth.username.as_deref(), Some("from-args"));
        assert_eq!(config.auth.password, None);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        match Config::from_toml_str("[upstream\nhost = 1") {
            Err(ConfigError::TomlError(_)) => {}
            other => panic!("expected TomlError, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_environment_supplies_arguments() {
        std::env::set_var("PROXY_PORT", "25565");
        std::env::set_var("MOJANG_USER", "bot@example.org");
        std::env::set_var("MOJANG_PASS", "hunter2");

        let args = Args::try_parse_from(["vigil"]).unwrap_or_else(|e| panic!("{}", e));

        std::env::remove_var("PROXY_PORT");
        std::env::remove_var("MOJANG_USER");
        std::env::remove_var("MOJANG_PASS");

        assert_eq!(args.listen_port, Some(25565));
        assert_eq!(args.username.as_deref(), Some("bot@example.org"));
        assert_eq!(args.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_password_is_not_debug_printed() {
        let auth = AuthConfig {
            password: Some(String::from("hunter2")),
            ..Default::default()
        };
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
