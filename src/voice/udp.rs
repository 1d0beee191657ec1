use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::{
    common::{errors::VoiceError, types::AnyResult},
    voice::constants::{
        DISCOVERY_PACKET_SIZE, IP_DISCOVERY_TIMEOUT_SECS, RTP_HEADER_LEN, RTP_OPUS_PAYLOAD_TYPE,
        RTP_TIMESTAMP_STEP, RTP_VERSION_BYTE, UDP_PACKET_BUF_CAPACITY,
    },
};

/// Datagram writer for encoded frames.
#[async_trait]
pub trait VoiceTransport: Send + Sync + 'static {
    async fn send(&mut self, payload: &[u8]) -> Result<(), VoiceError>;
    async fn close(&mut self) -> Result<(), VoiceError>;
}

/// Transforms a framed packet before it goes on the wire.
///
/// `packet` holds the RTP header followed by the payload. A sealer may
/// rewrite the payload in place and append trailing bytes, but must leave
/// the header readable. Failures reach the caller as [`VoiceError::Seal`].
pub trait PacketSealer: Send + Sync + 'static {
    fn seal(&mut self, packet: &mut Vec<u8>) -> AnyResult<()>;
}

/// Sends packets unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainSealer;

impl PacketSealer for PlainSealer {
    fn seal(&mut self, _packet: &mut Vec<u8>) -> AnyResult<()> {
        Ok(())
    }
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    address: SocketAddr,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    sealer: Box<dyn PacketSealer>,
    /// Reusable packet buffer, cleared per frame.
    packet_buf: Vec<u8>,
    closed: bool,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>, address: SocketAddr, ssrc: u32) -> Self {
        Self {
            socket,
            address,
            ssrc,
            sequence: 0,
            timestamp: 0,
            sealer: Box::new(PlainSealer),
            packet_buf: Vec::with_capacity(UDP_PACKET_BUF_CAPACITY),
            closed: false,
        }
    }

    pub fn with_sealer(mut self, sealer: impl PacketSealer) -> Self {
        self.sealer = Box::new(sealer);
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn build_packet(&mut self, payload: &[u8]) -> Result<(), VoiceError> {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let timestamp = self.timestamp;
        self.timestamp = self.timestamp.wrapping_add(RTP_TIMESTAMP_STEP);

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = RTP_VERSION_BYTE;
        header[1] = RTP_OPUS_PAYLOAD_TYPE;
        BigEndian::write_u16(&mut header[2..4], sequence);
        BigEndian::write_u32(&mut header[4..8], timestamp);
        BigEndian::write_u32(&mut header[8..12], self.ssrc);

        self.packet_buf.clear();
        self.packet_buf.extend_from_slice(&header);
        self.packet_buf.extend_from_slice(payload);
        self.sealer
            .seal(&mut self.packet_buf)
            .map_err(|e| VoiceError::Seal(e.to_string()))
    }
}

#[async_trait]
impl VoiceTransport for UdpTransport {
    async fn send(&mut self, payload: &[u8]) -> Result<(), VoiceError> {
        if self.closed {
            return Err(VoiceError::Closed);
        }
        self.build_packet(payload)?;
        self.socket.send_to(&self.packet_buf, self.address).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        self.closed = true;
        Ok(())
    }
}

/// Asks the voice server which public address our socket maps to.
pub async fn discover_ip(
    socket: &UdpSocket,
    addr: SocketAddr,
    ssrc: u32,
) -> Result<SocketAddr, VoiceError> {
    let mut packet = [0u8; DISCOVERY_PACKET_SIZE];
    BigEndian::write_u16(&mut packet[0..2], 1);
    BigEndian::write_u16(&mut packet[2..4], 70);
    BigEndian::write_u32(&mut packet[4..8], ssrc);

    socket.send_to(&packet, addr).await?;

    let mut buf = [0u8; DISCOVERY_PACKET_SIZE];
    let n = match tokio::time::timeout(
        Duration::from_secs(IP_DISCOVERY_TIMEOUT_SECS),
        socket.recv(&mut buf),
    )
    .await
    {
        Ok(res) => res?,
        Err(_) => return Err(VoiceError::Discovery("IP discovery timed out".into())),
    };
    if n < DISCOVERY_PACKET_SIZE {
        return Err(VoiceError::Discovery(format!(
            "Malformed IP discovery response ({} bytes)",
            n
        )));
    }

    let ip_str = std::str::from_utf8(&buf[8..72])
        .map_err(|e| VoiceError::Discovery(e.to_string()))?
        .trim_matches('\0');
    let ip: IpAddr = ip_str
        .parse()
        .map_err(|_| VoiceError::Discovery(format!("Invalid address '{}'", ip_str)))?;
    let port = BigEndian::read_u16(&buf[72..74]);

    debug!("IP discovery resolved {}:{}", ip, port);
    Ok(SocketAddr::new(ip, port))
}
