use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::crypto::seal::{OpeningContext, SealingContext};
use crate::error::{Error, HandshakeError};
use crate::frame::codec::FrameCodec;
use crate::frame::{Flags, Frame, FrameType};

use super::handshake::HandshakeResult;

/// A message received on an established channel.
#[derive(Debug)]
pub enum Message {
    /// Decrypted application data.
    Data(Bytes),
    /// Peer-initiated shutdown; doubles as the provisioning acknowledgement.
    Shutdown,
    /// Plaintext error text from the peer.
    Error(String),
}

/// Encrypted channel over any `AsyncRead + AsyncWrite` transport, built from
/// a completed handshake.
pub struct SecureChannel<T> {
    transport: T,
    sealer: SealingContext,
    opener: OpeningContext,
    read_buf: BytesMut,
    codec: FrameCodec,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SecureChannel<T> {
    pub fn new(transport: T, handshake: HandshakeResult) -> Self {
        Self {
            transport,
            sealer: SealingContext::new(&handshake.send_key, handshake.session_id),
            opener: OpeningContext::new(&handshake.recv_key, handshake.session_id),
            read_buf: handshake.residual,
            codec: FrameCodec::new(),
        }
    }

    /// Send an encrypted data payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        let (ciphertext, seq) = self
            .sealer
            .seal(payload, FrameType::Data, Flags::encrypted())?;
        let frame = Frame::data(seq, Bytes::from(ciphertext))?;
        self.send_frame(frame).await
    }

    /// Send an encrypted shutdown frame to the peer.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        let (ciphertext, seq) = self
            .sealer
            .seal(&[], FrameType::Shutdown, Flags::encrypted())?;
        let frame = Frame::shutdown(seq, Bytes::from(ciphertext))?;
        self.send_frame(frame).await
    }

    /// Receive a message from the channel.
    pub async fn recv(&mut self) -> Result<Message, Error> {
        let frame = self.recv_frame().await?;
        let header = &frame.header;

        match header.msg_type {
            FrameType::Error => {
                let msg = String::from_utf8_lossy(&frame.payload).to_string();
                Ok(Message::Error(msg))
            }
            FrameType::Hello => Err(HandshakeError::UnexpectedMessage {
                expected: "Data/Shutdown/Error",
                actual: "Hello".to_string(),
            }
            .into()),
            FrameType::Data | FrameType::Shutdown => {
                if !header.flags.is_encrypted() {
                    return Err(HandshakeError::UnencryptedFrame.into());
                }
                let plaintext = self.opener.open(
                    &frame.payload,
                    header.sequence,
                    header.msg_type,
                    header.flags,
                )?;
                if header.msg_type == FrameType::Shutdown {
                    Ok(Message::Shutdown)
                } else {
                    Ok(Message::Data(Bytes::from(plaintext)))
                }
            }
        }
    }

    /// Flush and close the write half of the underlying transport.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.transport.shutdown().await?;
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf)?;
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Frame, Error> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            let n = self.transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(HandshakeError::Closed.into());
            }
        }
    }
}
