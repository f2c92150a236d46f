use std::sync::Arc;

use chrono::Utc;
use log::{trace, warn};

use super::keep_alive::maintenance_reply;
use crate::data_capture::PacketRecorder;
use crate::error_handling::types::TransportError;
use crate::protocol::{Packet, UpstreamLink};
use crate::relay::Relay;
use crate::session_management::session::Session;

/// Everything bound to one steady-state session: the link, its dump and its relay.
pub struct ActiveSession {
    pub session: Session,
    pub link: Box<dyn UpstreamLink>,
    pub recorder: PacketRecorder,
    pub relay: Arc<dyn Relay>,
}

impl ActiveSession {
    /// The single inbound dispatch point of the steady state.
    ///
    /// Order per packet: capture, then the maintenance reply, then the relay.
    /// The reply is written before this returns, so it always precedes the
    /// handling of the next inbound packet.
    pub async fn dispatch(&mut self, packet: Packet) -> Result<(), TransportError> {
        self.session.packets_received += 1;
        self.recorder.record(packet.raw(), Utc::now());

        match maintenance_reply(&packet) {
            Ok(Some(reply)) => {
                trace!(
                    "[{}] answering 0x{:02x} with 0x{:02x}",
                    self.session.id,
                    packet.id(),
                    reply.id()
                );
                self.link.send(reply).await?;
            }
            Ok(None) => {}
            Err(e) => warn!(
                "[{}] Unable to answer packet 0x{:02x}: {}",
                self.session.id,
                packet.id(),
                e
            ),
        }

        self.relay.forward(Arc::new(packet));
        Ok(())
    }
}
