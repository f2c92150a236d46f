pub mod gateway;
pub mod spectator_login;
pub mod status;
pub mod types;

pub use gateway::{SpectatorGateway, NOT_CONNECTED_MESSAGE};
pub use spectator_login::{OfflineLogin, OnlineLogin, SpectatorLogin};
pub use types::StatusResponse;
