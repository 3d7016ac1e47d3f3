//! Shared framing logic for the TCP transport and the packet codec.
//!
//! Frame format: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4) | payload.

use anyhow::{bail, Context, Result};

use crate::name::{Component, Name};

pub const FRAME_HEADER_LEN: usize = 11;

/// Validate frame payload size using protocol::MAX_FRAME_SIZE directly
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > crate::protocol::MAX_FRAME_SIZE {
        bail!(
            "frame payload too large: {} bytes (max: {})",
            size,
            crate::protocol::MAX_FRAME_SIZE
        );
    }
    Ok(())
}

/// Build frame header (11 bytes)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; FRAME_HEADER_LEN] {
    use crate::protocol::{MAGIC, VERSION};

    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = frame_type;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<(u8, u32)> {
    use crate::protocol::{MAGIC, VERSION};

    if &header[0..4] != MAGIC {
        bail!("invalid magic in frame header");
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        bail!("protocol version mismatch: got {}, expected {}", version, VERSION);
    }

    let frame_type = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

    Ok((frame_type, payload_len))
}

/// Non-negative integer in the shortest of 1, 2, 4 or 8 big-endian bytes.
pub fn encode_nonneg(value: u64) -> Vec<u8> {
    if value <= u8::MAX as u64 {
        vec![value as u8]
    } else if value <= u16::MAX as u64 {
        (value as u16).to_be_bytes().to_vec()
    } else if value <= u32::MAX as u64 {
        (value as u32).to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

pub fn decode_nonneg(bytes: &[u8]) -> Result<u64> {
    Ok(match bytes.len() {
        1 => bytes[0] as u64,
        2 => u16::from_be_bytes([bytes[0], bytes[1]]) as u64,
        4 => u32::from_be_bytes(bytes.try_into().context("u32 bytes")?) as u64,
        8 => u64::from_be_bytes(bytes.try_into().context("u64 bytes")?),
        n => bail!("invalid non-negative integer length: {}", n),
    })
}

const KIND_GENERIC: u8 = 0;
const KIND_SEGMENT: u8 = 1;
const KIND_VERSION: u8 = 2;

/// Name on the wire: count u16 | (kind u8 | body)*
/// body = len u16 | utf8 for generic components, u64 LE otherwise.
pub fn write_name(out: &mut Vec<u8>, name: &Name) -> Result<()> {
    let count = u16::try_from(name.len()).context("name has too many components")?;
    out.extend_from_slice(&count.to_le_bytes());
    for c in name.components() {
        match c {
            Component::Generic(s) => {
                let len = u16::try_from(s.len()).context("name component too long")?;
                out.push(KIND_GENERIC);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Component::Segment(n) => {
                out.push(KIND_SEGMENT);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Component::Version(n) => {
                out.push(KIND_VERSION);
                out.extend_from_slice(&n.to_le_bytes());
            }
        }
    }
    Ok(())
}

/// Cursor over a frame payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            bail!("truncated payload: need {} byte(s) at offset {}", n, self.pos);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().context("u32 bytes")?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().context("u64 bytes")?))
    }

    pub fn name(&mut self) -> Result<Name> {
        let count = self.u16()? as usize;
        let mut comps = Vec::with_capacity(count);
        for _ in 0..count {
            let c = match self.u8()? {
                KIND_GENERIC => {
                    let len = self.u16()? as usize;
                    let s = std::str::from_utf8(self.take(len)?).context("name component is not utf-8")?;
                    Component::Generic(s.to_string())
                }
                KIND_SEGMENT => Component::Segment(self.u64()?),
                KIND_VERSION => Component::Version(self.u64()?),
                k => bail!("unknown name component kind {}", k),
            };
            comps.push(c);
        }
        Ok(Name::from_components(comps))
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}
