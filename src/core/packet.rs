//! RCON packet layout.
//!
//! ```text
//! [0..3]   i32 LE  size      = len(body) + 10
//! [4..7]   i32 LE  id
//! [8..11]  i32 LE  type
//! [12..]   body
//! [..+2]   0x00 0x00
//! ```
//!
//! The size field is consumed separately by framed reads, so a
//! [`ReceivedPacket`] holds everything *after* it: its first four bytes are the
//! id and the next four the type.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Smallest valid `size` field: id + type + two terminator bytes.
pub const MIN_PACKET_SIZE: i32 = 10;

/// Smallest valid wire length (size field included).
pub const MIN_PACKET_LENGTH: usize = 14;

/// Hard cap on the `size` field of any packet we send.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Largest body that still fits under [`MAX_PACKET_SIZE`].
pub const MAX_BODY_SIZE: usize = MAX_PACKET_SIZE - MIN_PACKET_SIZE as usize;

/// Default bound on an inbound `size` field at the client. Servers answer
/// with bodies of up to [`MAX_PACKET_SIZE`] bytes, framed on top of that.
pub const MAX_RESPONSE_SIZE: usize = MAX_PACKET_SIZE + MIN_PACKET_SIZE as usize;

/// A response to an exec-command packet.
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// A command packet.
pub const SERVERDATA_EXECCOMMAND: i32 = 2;

/// A response to an auth packet. Shares its value with
/// [`SERVERDATA_EXECCOMMAND`]; only the direction tells them apart.
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;

/// An auth packet carrying the password as its body.
pub const SERVERDATA_AUTH: i32 = 3;

const TERMINATOR: [u8; 2] = [0, 0];

/// Encode `(body, id, type)` into its wire form.
///
/// Fails with [`ProtocolError::OversizedPacket`] when `len(body) + 10`
/// exceeds [`MAX_PACKET_SIZE`]; a packet is never truncated.
pub fn encode(body: &[u8], id: i32, packet_type: i32) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(body.len() + MIN_PACKET_LENGTH);
    encode_into(body, id, packet_type, &mut dst)?;
    Ok(dst.freeze())
}

/// Append the wire form of `(body, id, type)` to `dst`.
pub fn encode_into(body: &[u8], id: i32, packet_type: i32, dst: &mut BytesMut) -> Result<()> {
    let size = body.len() + MIN_PACKET_SIZE as usize;
    if size > MAX_PACKET_SIZE {
        return Err(ProtocolError::OversizedPacket(size));
    }

    dst.reserve(size + 4);
    dst.put_i32_le(size as i32);
    dst.put_i32_le(id);
    dst.put_i32_le(packet_type);
    dst.put_slice(body);
    dst.put_slice(&TERMINATOR);
    Ok(())
}

/// Read bytes 0..4 of a received buffer (the id) as a little-endian i32.
pub fn decode_id(buf: &[u8]) -> Result<i32> {
    read_i32_le(buf, 0)
}

/// Read bytes 4..8 of a received buffer (the type) as a little-endian i32.
pub fn decode_type(buf: &[u8]) -> Result<i32> {
    read_i32_le(buf, 4)
}

#[inline]
fn read_i32_le(buf: &[u8], offset: usize) -> Result<i32> {
    buf.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .ok_or(ProtocolError::InvalidHeader)
}

/// An outgoing packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub packet_type: i32,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(id: i32, packet_type: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            packet_type,
            body: body.into(),
        }
    }

    /// Value of the size field this packet will carry.
    pub fn size(&self) -> usize {
        self.body.len() + MIN_PACKET_SIZE as usize
    }

    /// Full wire form, size field included.
    pub fn to_bytes(&self) -> Result<Bytes> {
        encode(&self.body, self.id, self.packet_type)
    }

    /// Parse one complete wire packet (size field included).
    ///
    /// Rejects buffers whose size field is below [`MIN_PACKET_SIZE`], above
    /// [`MAX_PACKET_SIZE`], or disagrees with the buffer length.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let size = read_i32_le(buf, 0)?;
        if size < MIN_PACKET_SIZE {
            return Err(ProtocolError::InvalidHeader);
        }
        let size = size as usize;
        if size > MAX_PACKET_SIZE {
            return Err(ProtocolError::OversizedPacket(size));
        }
        if buf.len() != size + 4 {
            return Err(ProtocolError::InvalidHeader);
        }

        let rest = &buf[4..];
        Ok(Self {
            id: decode_id(rest)?,
            packet_type: decode_type(rest)?,
            body: rest[8..size - 2].to_vec(),
        })
    }
}

/// One framed read: the size field and everything after it.
///
/// `server_responded` is true iff a framed read completed, even an empty one;
/// timeouts and read errors produce [`ReceivedPacket::no_response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub size: i32,
    pub data: Bytes,
    pub server_responded: bool,
}

impl ReceivedPacket {
    /// Nothing arrived in time, or the read failed.
    pub fn no_response() -> Self {
        Self {
            size: -1,
            data: Bytes::new(),
            server_responded: false,
        }
    }

    /// The peer sent a size field of zero or less and nothing else.
    pub fn empty(size: i32) -> Self {
        Self {
            size,
            data: Bytes::new(),
            server_responded: true,
        }
    }

    pub fn new(size: i32, data: Bytes) -> Self {
        Self {
            size,
            data,
            server_responded: true,
        }
    }

    /// Large enough to carry an id, a type and the terminators.
    pub fn has_payload(&self) -> bool {
        self.size >= MIN_PACKET_SIZE && self.data.len() >= MIN_PACKET_SIZE as usize
    }

    pub fn id(&self) -> Option<i32> {
        decode_id(&self.data).ok()
    }

    pub fn packet_type(&self) -> Option<i32> {
        decode_type(&self.data).ok()
    }

    /// Body bytes with the two terminators stripped.
    pub fn body(&self) -> &[u8] {
        if !self.has_payload() {
            return &[];
        }
        &self.data[8..self.data.len() - TERMINATOR.len()]
    }

    /// Body as text; invalid UTF-8 is replaced rather than rejected.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(self.body()).into_owned()
    }
}
