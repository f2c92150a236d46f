pub mod config;
pub mod types;

pub use config::{Args, Config};
pub use types::{AuthConfig, CaptureConfig, GatewayConfig, TimingConfig, UpstreamConfig};
