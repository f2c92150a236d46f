use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::data_capture::DumpSummary;
use crate::relay::BotProfile;
use crate::session_management::SessionState;

/// The one upstream connection attempt in flight.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub packets_received: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            packets_received: 0,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a steady-state session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    RemoteClosed,
    TransportFailed(String),
    ShutdownRequested,
}

/// Summary of a finished steady-state session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub profile: BotProfile,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub packets_received: u64,
    pub end: SessionEnd,
    pub dump: DumpSummary,
}
