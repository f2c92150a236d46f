//! Spectator fan-out for the live upstream session.

pub mod broadcast;
pub mod slot;
pub mod types;

pub use broadcast::{BroadcastRelay, BroadcastRelayFactory};
pub use slot::RelaySlot;
pub use types::{BotProfile, Relay, RelayFactory, Spectator, SpectatorStream};
