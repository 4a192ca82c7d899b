//! TCP transport primitives.
//!
//! Connect with a timeout, bind a listener, and the framed read/write
//! operations every higher layer is built on. All reads are bounded by a
//! caller-supplied wait so no worker blocks forever.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

use crate::core::codec::RconCodec;
use crate::core::packet::{Packet, ReceivedPacket};
use crate::error::{constants, ProtocolError, Result};
use crate::transport::classify::report_error;
use crate::utils::logging::EventLog;

/// A TCP stream framed with the RCON codec.
pub type RconFramed = Framed<TcpStream, RconCodec>;

/// Outcome of waiting for one frame.
#[derive(Debug)]
pub enum FrameRead {
    Packet(ReceivedPacket),
    /// Nothing arrived within the wait.
    TimedOut,
    /// The peer closed the stream.
    Closed,
    /// The read or the framing failed; the connection is unusable.
    Failed(ProtocolError),
}

pub fn parse_address(address: &str) -> Result<SocketAddr> {
    if address.is_empty() {
        return Err(ProtocolError::ConfigError(
            "Address is empty! You need to pass a valid address!".to_string(),
        ));
    }
    address
        .parse::<SocketAddr>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid address or port: '{address}'")))
}

/// Open a TCP connection, giving up after `timeout`.
#[instrument(level = "debug")]
pub async fn connect_with_timeout(
    address: &str,
    timeout: Duration,
    max_packet_size: usize,
) -> Result<RconFramed> {
    let addr = parse_address(address)?;

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ProtocolError::ConnectError(e.to_string())),
        Err(_) => {
            return Err(ProtocolError::ConnectError(
                constants::ERR_CONNECT_TIMEOUT.to_string(),
            ))
        }
    };
    stream.set_nodelay(true)?;

    debug!(peer = %addr, "TCP connection established");
    Ok(Framed::new(stream, RconCodec::new(max_packet_size)))
}

/// Bind a listening socket with address reuse enabled.
pub fn bind_listener(address: &str) -> Result<TcpListener> {
    let addr = parse_address(address)?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(1024)?)
}

/// Wait up to `wait` for the next frame.
///
/// Cancel-safe: bytes of a partially received frame stay buffered in the
/// codec and are completed by the next call.
pub async fn next_frame<T>(framed: &mut Framed<T, RconCodec>, wait: Duration) -> FrameRead
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(wait, framed.next()).await {
        Err(_) => FrameRead::TimedOut,
        Ok(None) => FrameRead::Closed,
        Ok(Some(Err(e))) => FrameRead::Failed(e),
        Ok(Some(Ok(packet))) => FrameRead::Packet(packet),
    }
}

/// Read one frame, folding every failure into a "no response" packet.
pub async fn read_framed_packet<T>(
    framed: &mut Framed<T, RconCodec>,
    wait: Duration,
    log: &EventLog,
) -> ReceivedPacket
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match next_frame(framed, wait).await {
        FrameRead::Packet(packet) => packet,
        FrameRead::TimedOut => {
            log.debug("Did not receive a packet in time. Did the server send a response?");
            ReceivedPacket::no_response()
        }
        FrameRead::Closed => {
            log.warn(constants::ERR_CONNECTION_CLOSED);
            ReceivedPacket::no_response()
        }
        FrameRead::Failed(e) => {
            log.warn(&format!("Failed to read packet: {e}"));
            report_error(&e, log);
            ReceivedPacket::no_response()
        }
    }
}

/// Encode and flush one packet, returning the bytes written.
///
/// Oversized packets are rejected before anything reaches the socket.
pub async fn write_packet<T>(framed: &mut Framed<T, RconCodec>, packet: Packet) -> Result<usize>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let len = packet.size() + 4;
    framed.send(packet).await?;
    Ok(len)
}
