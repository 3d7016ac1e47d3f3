//! Request, response and negative-acknowledgment packets.

use anyhow::{bail, Result};

use crate::error::{FileError, FileResult};
use crate::name::Name;
use crate::protocol::frame;
use crate::protocol_core::{
    build_frame_header, decode_nonneg, encode_nonneg, validate_frame_size, write_name, Reader,
};

/// How a response's content is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Blob,
    NonNegativeInteger,
    NegativeInteger,
}

impl ContentType {
    fn to_byte(self) -> u8 {
        match self {
            ContentType::Blob => 0,
            ContentType::NonNegativeInteger => 1,
            ContentType::NegativeInteger => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => ContentType::Blob,
            1 => ContentType::NonNegativeInteger,
            2 => ContentType::NegativeInteger,
            _ => bail!("unknown content type {}", b),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    NoRoute,
    Congestion,
    Duplicate,
}

impl NackReason {
    fn to_byte(self) -> u8 {
        match self {
            NackReason::NoRoute => 0,
            NackReason::Congestion => 1,
            NackReason::Duplicate => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => NackReason::NoRoute,
            1 => NackReason::Congestion,
            2 => NackReason::Duplicate,
            _ => bail!("unknown nack reason {}", b),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: Name,
    pub lifetime_ms: u32,
}

impl Request {
    pub fn new(name: Name, lifetime_ms: u64) -> Self {
        Self {
            name,
            lifetime_ms: lifetime_ms.min(u32::MAX as u64) as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub name: Name,
    pub content_type: ContentType,
    pub content: Vec<u8>,
    pub freshness_ms: u32,
}

impl Response {
    /// Integer outcome; the sign travels in the content type.
    pub fn integer(name: Name, value: i64) -> Self {
        let content_type = if value < 0 {
            ContentType::NegativeInteger
        } else {
            ContentType::NonNegativeInteger
        };
        Self {
            name,
            content_type,
            content: encode_nonneg(value.unsigned_abs()),
            freshness_ms: 0,
        }
    }

    pub fn blob(name: Name, content: Vec<u8>) -> Self {
        Self {
            name,
            content_type: ContentType::Blob,
            content,
            freshness_ms: 0,
        }
    }

    pub fn with_freshness(mut self, ms: u64) -> Self {
        self.freshness_ms = ms.min(u32::MAX as u64) as u32;
        self
    }

    pub fn is_negative(&self) -> bool {
        self.content_type == ContentType::NegativeInteger
    }

    /// Signed integer carried by this response.
    pub fn as_integer(&self) -> FileResult<i64> {
        let sign = match self.content_type {
            ContentType::NonNegativeInteger => 1,
            ContentType::NegativeInteger => -1,
            ContentType::Blob => {
                return Err(self.malformed("expected an integer, got a blob"));
            }
        };
        let abs = decode_nonneg(&self.content).map_err(|e| self.malformed(&e.to_string()))?;
        let abs = i64::try_from(abs).map_err(|_| self.malformed("integer out of range"))?;
        Ok(sign * abs)
    }

    pub fn malformed(&self, reason: &str) -> FileError {
        FileError::MalformedPeerResponse {
            name: self.name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub name: Name,
    pub reason: NackReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request(Request),
    Response(Response),
    Nack(Nack),
}

impl Packet {
    pub fn name(&self) -> &Name {
        match self {
            Packet::Request(r) => &r.name,
            Packet::Response(r) => &r.name,
            Packet::Nack(n) => &n.name,
        }
    }

    /// Frame type and payload for this packet.
    pub fn encode(&self) -> Result<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        let t = match self {
            Packet::Request(r) => {
                write_name(&mut out, &r.name)?;
                out.extend_from_slice(&r.lifetime_ms.to_le_bytes());
                frame::REQUEST
            }
            Packet::Response(r) => {
                write_name(&mut out, &r.name)?;
                out.push(r.content_type.to_byte());
                out.extend_from_slice(&r.freshness_ms.to_le_bytes());
                out.extend_from_slice(&(r.content.len() as u32).to_le_bytes());
                out.extend_from_slice(&r.content);
                frame::RESPONSE
            }
            Packet::Nack(n) => {
                write_name(&mut out, &n.name)?;
                out.push(n.reason.to_byte());
                frame::NACK
            }
        };
        validate_frame_size(out.len())?;
        Ok((t, out))
    }

    /// Complete frame (header + payload) ready to write.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let (t, payload) = self.encode()?;
        let mut buf = Vec::with_capacity(crate::protocol_core::FRAME_HEADER_LEN + payload.len());
        buf.extend_from_slice(&build_frame_header(t, payload.len() as u32));
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn decode(frame_type: u8, payload: &[u8]) -> Result<Packet> {
        let mut rd = Reader::new(payload);
        let name = rd.name()?;
        let pkt = match frame_type {
            frame::REQUEST => Packet::Request(Request {
                name,
                lifetime_ms: rd.u32()?,
            }),
            frame::RESPONSE => {
                let content_type = ContentType::from_byte(rd.u8()?)?;
                let freshness_ms = rd.u32()?;
                let len = rd.u32()? as usize;
                let content = rd.take(len)?.to_vec();
                Packet::Response(Response {
                    name,
                    content_type,
                    content,
                    freshness_ms,
                })
            }
            frame::NACK => Packet::Nack(Nack {
                name,
                reason: NackReason::from_byte(rd.u8()?)?,
            }),
            t => bail!("unknown frame type {}", t),
        };
        if !rd.is_empty() {
            bail!("trailing bytes after packet {}", pkt.name());
        }
        Ok(pkt)
    }
}
