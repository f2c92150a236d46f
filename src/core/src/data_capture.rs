pub mod dump;
pub mod recorder;
pub mod types;

pub use dump::read_records;
pub use recorder::PacketRecorder;
pub use types::{CapturedPacket, DumpSummary};
