use std::convert::TryFrom;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::{read_header, write_header, Packet, ProtocolError, HEADER_SIZE};

#[derive(Debug, Error)]
pub enum OrgbCodecError {
    #[error("i/o error: {0}")]
    Io(#[from] futures_io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// OpenRGB SDK tokio codec
///
/// Frames are a fixed 16 byte header followed by the payload length the
/// header declares. Decoding waits for a complete frame before yielding.
pub struct OrgbCodec;

impl OrgbCodec {
    /// Create a new OrgbCodec
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrgbCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OrgbCodec {
    type Item = Packet;
    type Error = OrgbCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        // Parse off a copy so the buffer is only consumed once the full
        // frame arrived
        let header = read_header(&mut &src[..])?;
        let data_size = usize::try_from(header.data_size)
            .map_err(|_| ProtocolError::InvalidSize(header.data_size))?;

        if src.len() < HEADER_SIZE + data_size {
            src.reserve(HEADER_SIZE + data_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(data_size).freeze();

        Ok(Some(Packet { header, payload }))
    }
}

impl Encoder<Packet> for OrgbCodec {
    type Error = OrgbCodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_SIZE + item.payload.len());
        write_header(
            dst,
            item.header.device_index,
            item.header.packet_id,
            item.payload.len() as i32,
        );
        dst.put_slice(&item.payload);

        Ok(())
    }
}
