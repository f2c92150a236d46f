use log::trace;
use tokio::io::{AsyncRead, AsyncWrite};

use super::types::StatusResponse;
use crate::error_handling::types::{GatewayError, TransportError};
use crate::protocol::{v340, Connection, PacketBuilder, PacketReader};

/// Answers status requests and pings until the client hangs up.
///
/// Neither answer depends on the upstream session.
pub async fn serve_status<S>(
    connection: &mut Connection<S>,
    response: &StatusResponse,
) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Send,
{
    loop {
        let packet = match connection.read_packet().await {
            Ok(packet) => packet,
            Err(TransportError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match packet.id() {
            v340::status::REQUEST => {
                trace!("status request");
                let reply = PacketBuilder::new(v340::status::RESPONSE)
                    .write_json(response)?
                    .build();
                connection.write_packet(&reply).await?;
            }
            v340::status::PING => {
                let payload = PacketReader::new(&packet).read_i64()?;
                let pong = PacketBuilder::new(v340::status::PONG)
                    .write_i64(payload)
                    .build();
                connection.write_packet(&pong).await?;
            }
            other => return Err(GatewayError::UnexpectedPacket(other)),
        }
    }
}
