use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, FrameHeader, HEADER_SIZE};
use crate::error::FrameError;

/// Stateless frame codec. The header is re-parsed until the whole frame is
/// buffered, so a header error surfaces as soon as its 13 bytes arrive.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = FrameHeader::parse(&src[..HEADER_SIZE])?;

        let frame_len = HEADER_SIZE + header.payload_len as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(header.payload_len as usize).freeze();
        Ok(Some(Frame { header, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.reserve(frame.encoded_len());
        frame.header.write(dst);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
