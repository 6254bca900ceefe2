use std::net::IpAddr;

use bytes::{Buf, BufMut, BytesMut};

use crate::DiscoveryError;

/// RTP version byte (V=2, no padding, extension or CSRCs).
pub const RTP_VERSION_BYTE: u8 = 0x80;
/// RTP payload type for Opus audio.
pub const RTP_PAYLOAD_TYPE: u8 = 0x78;
pub const RTP_HEADER_SIZE: usize = 12;
/// Samples per 20 ms frame at 48 kHz.
pub const TIMESTAMP_STEP: u32 = 960;

/// Opus frame announcing end of speech.
pub const SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

pub const DISCOVERY_PACKET_SIZE: usize = 74;
const DISCOVERY_REQUEST: u16 = 0x1;
const DISCOVERY_RESPONSE: u16 = 0x2;
/// Value of the length field: everything after type and length.
const DISCOVERY_BODY_LEN: u16 = 70;
const DISCOVERY_ADDRESS_LEN: usize = 64;

/// 12-byte RTP header prefixed to every audio datagram.
///
/// ```text
/// Byte 0:     version/flags (0x80)
/// Byte 1:     payload type (0x78)
/// Bytes 2-3:  sequence (u16 BE)
/// Bytes 4-7:  timestamp (u32 BE)
/// Bytes 8-11: SSRC (u32 BE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(RTP_VERSION_BYTE);
        buf.put_u8(RTP_PAYLOAD_TYPE);
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    pub fn to_bytes(&self) -> [u8; RTP_HEADER_SIZE] {
        let mut out = [0u8; RTP_HEADER_SIZE];
        self.encode(&mut &mut out[..]);
        out
    }

    /// Decode a header, ignoring the version and payload type bytes.
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < RTP_HEADER_SIZE {
            return None;
        }
        buf.advance(2);
        Some(Self {
            sequence: buf.get_u16(),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
        })
    }
}

/// Hands out consecutive headers: sequence +1 and timestamp +960 per
/// packet, both wrapping at their integer width.
#[derive(Debug, Clone)]
pub struct PacketSequencer {
    sequence: u16,
    timestamp: u32,
}

impl PacketSequencer {
    pub fn new(sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence,
            timestamp,
        }
    }

    /// Start from random values, as RTP senders are expected to.
    pub fn random() -> Self {
        Self::new(rand::random(), rand::random())
    }

    pub fn next_header(&mut self, ssrc: u32) -> RtpHeader {
        let header = RtpHeader {
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(TIMESTAMP_STEP);
        header
    }
}

/// IP discovery datagram.
///
/// ```text
/// Bytes 0-1:   type (1 = request, 2 = response)
/// Bytes 2-3:   length (70)
/// Bytes 4-7:   SSRC
/// Bytes 8-71:  address, NUL padded
/// Bytes 72-73: port
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPacket {
    pub ssrc: u32,
    pub address: String,
    pub port: u16,
}

impl DiscoveryPacket {
    pub fn request(ssrc: u32) -> [u8; DISCOVERY_PACKET_SIZE] {
        let mut buf = BytesMut::with_capacity(DISCOVERY_PACKET_SIZE);
        buf.put_u16(DISCOVERY_REQUEST);
        buf.put_u16(DISCOVERY_BODY_LEN);
        buf.put_u32(ssrc);
        buf.put_bytes(0, DISCOVERY_ADDRESS_LEN);
        buf.put_u16(0);
        let mut out = [0u8; DISCOVERY_PACKET_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Encode a response; only used by tests and local fakes.
    pub fn response(&self) -> [u8; DISCOVERY_PACKET_SIZE] {
        let mut out = Self::request(self.ssrc);
        out[0..2].copy_from_slice(&DISCOVERY_RESPONSE.to_be_bytes());
        let address = self.address.as_bytes();
        let len = address.len().min(DISCOVERY_ADDRESS_LEN - 1);
        out[8..8 + len].copy_from_slice(&address[..len]);
        out[72..74].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    /// Parse and validate a response to a probe sent for `expected_ssrc`.
    pub fn parse_response(packet: &[u8], expected_ssrc: u32) -> Result<Self, DiscoveryError> {
        if packet.len() != DISCOVERY_PACKET_SIZE {
            return Err(DiscoveryError::Malformed("wrong packet size"));
        }
        let mut buf = packet;
        if buf.get_u16() != DISCOVERY_RESPONSE {
            return Err(DiscoveryError::Malformed("not a response"));
        }
        if buf.get_u16() != DISCOVERY_BODY_LEN {
            return Err(DiscoveryError::Malformed("bad length field"));
        }
        let ssrc = buf.get_u32();
        if ssrc != expected_ssrc {
            return Err(DiscoveryError::Malformed("ssrc mismatch"));
        }

        let raw = &buf[..DISCOVERY_ADDRESS_LEN];
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        let address = std::str::from_utf8(&raw[..end])
            .map_err(|_| DiscoveryError::Malformed("address is not UTF-8"))?
            .trim()
            .to_string();
        if address.parse::<IpAddr>().is_err() {
            return Err(DiscoveryError::Malformed("address is not an IP"));
        }
        buf.advance(DISCOVERY_ADDRESS_LEN);
        let port = buf.get_u16();

        Ok(Self {
            ssrc,
            address,
            port,
        })
    }
}
