//! Wire framing.
//!
//! ```text
//! +-------+---------+------+-------+----------+-------------+---------+
//! | magic | version | type | flags | sequence | payload_len | payload |
//! |  u16  |   u8    |  u8  |  u8   |   u32    |     u32     |   ...   |
//! +-------+---------+------+-------+----------+-------------+---------+
//! ```
//!
//! All integers are big-endian.

pub mod codec;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// "SP", secret provisioning.
pub const MAGIC: u16 = 0x5350;

pub const PROTOCOL_VERSION: u8 = 1;

pub const HEADER_SIZE: usize = 13;

/// Largest payload accepted in either direction. The client hello with its
/// attestation document is the only frame that comes close.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 + 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Hello = 0x01,
    Data = 0x02,
    Error = 0x03,
    Shutdown = 0x04,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(raw: u8) -> Result<Self, FrameError> {
        Ok(match raw {
            0x01 => Self::Hello,
            0x02 => Self::Data,
            0x03 => Self::Error,
            0x04 => Self::Shutdown,
            other => return Err(FrameError::UnknownMessageType(other)),
        })
    }
}

/// Header flag bits. Only bit 0 (payload is AEAD ciphertext) is defined;
/// other bits are carried through and authenticated but carry no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const ENCRYPTED: u8 = 0x01;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn encrypted() -> Self {
        Self(Self::ENCRYPTED)
    }

    pub const fn from_raw(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_encrypted(self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub msg_type: FrameType,
    pub flags: Flags,
    pub sequence: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u16(MAGIC);
        dst.put_u8(self.version);
        dst.put_u8(self.msg_type as u8);
        dst.put_u8(self.flags.raw());
        dst.put_u32(self.sequence);
        dst.put_u32(self.payload_len);
    }

    /// Parse and validate the first [`HEADER_SIZE`] bytes of `raw` without
    /// consuming them. The caller guarantees `raw` is long enough.
    ///
    /// An oversized `payload_len` is refused here, before any payload bytes
    /// are buffered.
    pub fn parse(mut raw: &[u8]) -> Result<Self, FrameError> {
        debug_assert!(raw.len() >= HEADER_SIZE);

        let magic = raw.get_u16();
        if magic != MAGIC {
            return Err(FrameError::InvalidMagic(magic));
        }
        let version = raw.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let msg_type = FrameType::try_from(raw.get_u8())?;
        let flags = Flags(raw.get_u8());
        let sequence = raw.get_u32();
        let payload_len = raw.get_u32();
        check_payload_len(payload_len as usize)?;

        Ok(Self {
            version,
            msg_type,
            flags,
            sequence,
            payload_len,
        })
    }
}

fn check_payload_len(size: usize) -> Result<(), FrameError> {
    if size > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    fn new(msg_type: FrameType, flags: Flags, sequence: u32, payload: Bytes) -> Result<Self, FrameError> {
        check_payload_len(payload.len())?;
        Ok(Self {
            header: FrameHeader {
                version: PROTOCOL_VERSION,
                msg_type,
                flags,
                sequence,
                payload_len: payload.len() as u32,
            },
            payload,
        })
    }

    /// Plaintext handshake message.
    pub fn hello(sequence: u32, payload: Bytes) -> Result<Self, FrameError> {
        Self::new(FrameType::Hello, Flags::empty(), sequence, payload)
    }

    /// Sealed application record.
    pub fn data(sequence: u32, ciphertext: Bytes) -> Result<Self, FrameError> {
        Self::new(FrameType::Data, Flags::encrypted(), sequence, ciphertext)
    }

    /// Sealed end-of-session marker (an empty record).
    pub fn shutdown(sequence: u32, ciphertext: Bytes) -> Result<Self, FrameError> {
        Self::new(FrameType::Shutdown, Flags::encrypted(), sequence, ciphertext)
    }

    /// Plaintext error. Short messages only, so this cannot exceed the cap.
    pub fn error(sequence: u32, message: &str) -> Self {
        let payload = Bytes::copy_from_slice(message.as_bytes());
        Self {
            header: FrameHeader {
                version: PROTOCOL_VERSION,
                msg_type: FrameType::Error,
                flags: Flags::empty(),
                sequence,
                payload_len: payload.len() as u32,
            },
            payload,
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
