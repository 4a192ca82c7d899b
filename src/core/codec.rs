//! Tokio codec framing RCON packets over a byte stream.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{self, Packet, ReceivedPacket, MAX_PACKET_SIZE};
use crate::error::{ProtocolError, Result};

/// Length-prefixed RCON framing.
///
/// Decoding yields one [`ReceivedPacket`] per size field. A size of zero or
/// less is a complete frame on its own (an empty response); a positive size
/// waits until that many bytes have arrived, so partial reads are buffered
/// until the frame is whole.
#[derive(Debug, Clone, Copy)]
pub struct RconCodec {
    max_packet_size: usize,
}

impl RconCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for RconCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl Decoder for RconCodec {
    type Item = ReceivedPacket;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let size = packet::decode_id(&src[..4])?;
        if size <= 0 {
            src.advance(4);
            return Ok(Some(ReceivedPacket::empty(size)));
        }

        let len = size as usize;
        if len > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(len));
        }

        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let data = src.split_to(len).freeze();
        Ok(Some(ReceivedPacket::new(size, data)))
    }
}

impl Encoder<Packet> for RconCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        packet::encode_into(&item.body, item.id, item.packet_type, dst)
    }
}
