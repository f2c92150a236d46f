use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingListenPort,
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::MissingListenPort => {
                write!(f, "No gateway listen port configured (set PROXY_PORT)")
            }
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failure of the credential acquisition chain.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Refresh failed (or there was nothing to refresh) and no username/password is configured.
    NoCredentials,
    /// The identity provider answered with a non-2xx status.
    Rejected(u16, String),
    /// The request never produced a response.
    Network(String),
    /// A 2xx response whose body could not be understood.
    InvalidResponse(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::NoCredentials => write!(f, "Could not authenticate without credentials"),
            AuthError::Rejected(status, e) => {
                write!(f, "Identity provider rejected request ({}): {}", status, e)
            }
            AuthError::Network(e) => write!(f, "Identity provider unreachable: {}", e),
            AuthError::InvalidResponse(e) => write!(f, "Invalid identity provider response: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug)]
pub enum TransportError {
    ConnectFailed(std::io::Error),
    Timeout,
    Closed,
    Io(std::io::Error),
    Malformed(String),
    /// Key exchange or cipher failure.
    Encryption(String),
    /// The session server refused to register the join.
    SessionJoin(AuthError),
    LoginRejected(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectFailed(e) => write!(f, "Connection failed: {}", e),
            TransportError::Timeout => write!(f, "Transport timed out"),
            TransportError::Closed => write!(f, "Connection closed by peer"),
            TransportError::Io(e) => write!(f, "Transport IO error: {}", e),
            TransportError::Malformed(e) => write!(f, "Malformed packet: {}", e),
            TransportError::Encryption(e) => write!(f, "Encryption failed: {}", e),
            TransportError::SessionJoin(e) => write!(f, "Session join failed: {}", e),
            TransportError::LoginRejected(e) => write!(f, "Login rejected: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<openssl::error::ErrorStack> for TransportError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        TransportError::Encryption(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }
}

/// Recorder-side failures. None of these ever leave the recorder: they are
/// logged and the affected record is dropped.
#[derive(Debug)]
pub enum CaptureError {
    Open(std::io::Error),
    Write(std::io::Error),
    BufferFull,
    Finalize(std::io::Error),
    WriterStopped,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Open(e) => write!(f, "Unable to open dump file: {}", e),
            CaptureError::Write(e) => write!(f, "Dump write failed: {}", e),
            CaptureError::BufferFull => write!(f, "Capture buffer full, record dropped"),
            CaptureError::Finalize(e) => write!(f, "Unable to finalize dump file: {}", e),
            CaptureError::WriterStopped => write!(f, "Dump writer stopped"),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug)]
pub enum StorageError {
    ReadFailed(String),
    WriteFailed(String),
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::Corrupt(e) => write!(f, "Stored data is corrupt: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum GatewayError {
    BindFailed(std::io::Error),
    Transport(TransportError),
    UnexpectedPacket(i32),
    InvalidNextState(i32),
    LoginFailed(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::BindFailed(e) => write!(f, "Gateway bind failed: {}", e),
            GatewayError::Transport(e) => write!(f, "Spectator transport error: {}", e),
            GatewayError::UnexpectedPacket(id) => {
                write!(f, "Unexpected packet 0x{:02x} from spectator", id)
            }
            GatewayError::InvalidNextState(s) => write!(f, "Invalid handshake next state {}", s),
            GatewayError::LoginFailed(e) => write!(f, "Spectator login failed: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        GatewayError::Transport(err)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    GatewayError(GatewayError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::GatewayError(e) => write!(f, "Gateway error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<GatewayError> for ControllerError {
    fn from(err: GatewayError) -> Self {
        ControllerError::GatewayError(err)
    }
}
