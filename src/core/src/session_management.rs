//! Upstream session management.
//!
//! This module owns the single upstream connection: its state machine, the
//! packets that keep it alive, and the resources bound to one steady-state session.

use std::fmt;

/// Steady-state resources of one session.
pub mod active_session;
/// Automatic replies that keep the upstream session alive.
pub mod keep_alive;
/// Session records and end-of-session reports.
pub mod session;
/// The upstream session controller.
pub mod session_manager;

pub use session::{Session, SessionEnd, SessionReport};
pub use session_manager::SessionManager;

/// Where the upstream session controller currently is.
///
/// The cycle is `Idle → Connecting → AwaitingLoginResult → SteadyState → Closing → Idle`;
/// failures before steady state fall back to `Idle` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingLoginResult,
    SteadyState,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingLoginResult => "awaiting login result",
            SessionState::SteadyState => "steady state",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}
