use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::packet::{DiscoveryPacket, DISCOVERY_PACKET_SIZE};
use crate::DiscoveryError;

pub const DEFAULT_DISCOVERY_ATTEMPTS: u32 = 5;
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Learn our externally visible address and port as seen by the voice server.
///
/// Each attempt sends one probe and waits up to `timeout` for a valid reply
/// from `peer`. Datagrams from other addresses and malformed replies are
/// skipped without consuming an attempt.
pub async fn discover_ip(
    socket: &UdpSocket,
    peer: SocketAddr,
    ssrc: u32,
    attempts: u32,
    timeout: Duration,
) -> Result<(String, u16), DiscoveryError> {
    let probe = DiscoveryPacket::request(ssrc);
    let mut buf = [0u8; 1024];

    for attempt in 1..=attempts.max(1) {
        tracing::debug!(%peer, ssrc, attempt, "sending IP discovery probe");
        socket.send_to(&probe, peer).await?;
        let deadline = Instant::now() + timeout;

        loop {
            let (len, from) =
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        tracing::warn!(%peer, attempt, "IP discovery timed out, retrying");
                        break;
                    }
                };
            if from != peer {
                tracing::debug!(%from, "ignoring datagram from unexpected peer");
                continue;
            }
            match DiscoveryPacket::parse_response(&buf[..len], ssrc) {
                Ok(reply) => {
                    tracing::debug!(address = %reply.address, port = reply.port, "IP discovery complete");
                    return Ok((reply.address, reply.port));
                }
                Err(err) => {
                    tracing::warn!(error = %err, len, expected = DISCOVERY_PACKET_SIZE, "ignoring invalid discovery reply");
                }
            }
        }
    }

    Err(DiscoveryError::TimedOut {
        attempts: attempts.max(1),
    })
}
