//! The three-message attested handshake.
//!
//! ```text
//! client -> server  Hello(0): 0x01 || client_eph || client_nonce || doc_len || attestation_doc
//! server            verify quote + measurements; on failure send Error("handshake failed")
//! server -> client  Hello(0): 0x02 || server_eph || server_nonce || server_static
//! client -> server  Hello(1): 0x03 || confirmation
//! ```
//!
//! The server runs its side in phases so the provisioning session can
//! interpose the policy verdict between reading the client hello and
//! answering it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hkdf::Hkdf;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::attestation::types::{AttestationDocument, VerifiedQuote};
use crate::attestation::{QuoteProvider, QuoteVerifier};
use crate::crypto::kex::{self, KeyPair};
use crate::crypto::{transcript, PublicKey, SymmetricKey};
use crate::error::{AttestError, CryptoError, Error, HandshakeError};
use crate::frame::codec::FrameCodec;
use crate::frame::{Frame, FrameType};
use crate::identity::ServerIdentity;

/// The only thing a refused client ever learns.
pub const REJECTION_MESSAGE: &str = "handshake failed";

const CLIENT_HELLO: u8 = 1;
const SERVER_HELLO: u8 = 2;
const CONFIRMATION: u8 = 3;

/// Maximum attestation document size accepted during handshake (64 KiB).
pub const MAX_ATTESTATION_DOC_SIZE: usize = 64 * 1024;

/// Result of a completed handshake.
pub struct HandshakeResult {
    /// Key for encrypting outgoing messages.
    pub send_key: SymmetricKey,
    /// Key for decrypting incoming messages.
    pub recv_key: SymmetricKey,
    /// Session ID derived from the transcript (domain-separated from key material).
    pub session_id: [u8; 32],
    /// Bytes read from the transport but not consumed by the handshake.
    /// Must be prepended to the channel's read buffer.
    pub residual: BytesMut,
}

/// First handshake message, as received by the server.
#[derive(Debug, Clone)]
pub struct ClientHello {
    pub public_key: PublicKey,
    pub nonce: [u8; 32],
    pub document: AttestationDocument,
}

// -- Wire helpers --

fn encode_client_hello(public_key: &PublicKey, nonce: &[u8; 32], doc: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 32 + 32 + 4 + doc.len());
    buf.put_u8(CLIENT_HELLO);
    buf.put_slice(public_key);
    buf.put_slice(nonce);
    buf.put_u32(doc.len() as u32);
    buf.put_slice(doc);
    buf.freeze()
}

fn encode_server_hello(ephemeral: &PublicKey, nonce: &[u8; 32], identity: &PublicKey) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 32 + 32 + 32);
    buf.put_u8(SERVER_HELLO);
    buf.put_slice(ephemeral);
    buf.put_slice(nonce);
    buf.put_slice(identity);
    buf.freeze()
}

fn encode_confirmation(confirmation_hash: &[u8; 32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 32);
    buf.put_u8(CONFIRMATION);
    buf.put_slice(confirmation_hash);
    buf.freeze()
}

fn check_message_number(
    payload: &[u8],
    number: u8,
    expected: &'static str,
) -> Result<(), HandshakeError> {
    match payload.first() {
        Some(&n) if n == number => Ok(()),
        Some(&n) => Err(HandshakeError::UnexpectedMessage {
            expected,
            actual: format!("message number {n}"),
        }),
        None => Err(HandshakeError::Failed(format!("{expected}: empty payload"))),
    }
}

fn parse_client_hello(payload: &[u8]) -> Result<ClientHello, HandshakeError> {
    const MIN_LEN: usize = 1 + 32 + 32 + 4;
    if payload.len() < MIN_LEN {
        return Err(HandshakeError::Failed("client hello too short".into()));
    }
    check_message_number(payload, CLIENT_HELLO, "client_hello (1)")?;

    let mut public_key = [0u8; 32];
    let mut nonce = [0u8; 32];
    public_key.copy_from_slice(&payload[1..33]);
    nonce.copy_from_slice(&payload[33..65]);

    let mut cursor = &payload[65..];
    let doc_len = cursor.get_u32() as usize;
    if doc_len > MAX_ATTESTATION_DOC_SIZE {
        return Err(HandshakeError::Failed(format!(
            "attestation document too large: {doc_len} bytes (max {MAX_ATTESTATION_DOC_SIZE})"
        )));
    }
    let expected_total = MIN_LEN + doc_len;
    if payload.len() != expected_total {
        return Err(HandshakeError::Failed(format!(
            "client hello: expected {expected_total} bytes, got {}",
            payload.len()
        )));
    }

    Ok(ClientHello {
        public_key,
        nonce,
        document: AttestationDocument::new(cursor[..doc_len].to_vec()),
    })
}

fn parse_server_hello(
    payload: &[u8],
) -> Result<(PublicKey, [u8; 32], PublicKey), HandshakeError> {
    const EXPECTED_LEN: usize = 1 + 32 + 32 + 32;
    if payload.len() != EXPECTED_LEN {
        return Err(HandshakeError::Failed(format!(
            "server hello: expected {EXPECTED_LEN} bytes, got {}",
            payload.len()
        )));
    }
    check_message_number(payload, SERVER_HELLO, "server_hello (2)")?;

    let mut ephemeral = [0u8; 32];
    let mut nonce = [0u8; 32];
    let mut identity = [0u8; 32];
    ephemeral.copy_from_slice(&payload[1..33]);
    nonce.copy_from_slice(&payload[33..65]);
    identity.copy_from_slice(&payload[65..97]);
    Ok((ephemeral, nonce, identity))
}

fn parse_confirmation(payload: &[u8]) -> Result<[u8; 32], HandshakeError> {
    const EXPECTED_LEN: usize = 1 + 32;
    if payload.len() != EXPECTED_LEN {
        return Err(HandshakeError::Failed(format!(
            "confirmation: expected {EXPECTED_LEN} bytes, got {}",
            payload.len()
        )));
    }
    check_message_number(payload, CONFIRMATION, "confirmation (3)")?;

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&payload[1..33]);
    Ok(hash)
}

/// Confirmation hash binding both session keys.
fn compute_confirmation(
    session_id: &[u8; 32],
    send_key: &SymmetricKey,
    recv_key: &SymmetricKey,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"sp-confirmation");
    hasher.update(session_id);
    hasher.update(send_key.as_bytes());
    hasher.update(recv_key.as_bytes());
    hasher.finalize().into()
}

/// Derive a session ID from the transcript hash via HKDF.
fn derive_session_id(transcript_hash: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(None, transcript_hash);
    let mut session_id = [0u8; 32];
    hkdf.expand(b"sp-session-id", &mut session_id)
        .map_err(|_| CryptoError::HkdfExpandFailed)?;
    Ok(session_id)
}

fn combine_nonces(client: &[u8; 32], server: &[u8; 32]) -> [u8; 32] {
    let mut combined = [0u8; 32];
    for (out, (c, s)) in combined.iter_mut().zip(client.iter().zip(server.iter())) {
        *out = c ^ s;
    }
    combined
}

fn random_nonce() -> [u8; 32] {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill(&mut nonce);
    nonce
}

// -- Transport helpers --

async fn send_frame<T: AsyncWrite + Unpin>(transport: &mut T, frame: Frame) -> Result<(), Error> {
    let mut buf = BytesMut::new();
    FrameCodec::new().encode(frame, &mut buf)?;
    transport.write_all(&buf).await?;
    transport.flush().await?;
    Ok(())
}

/// Maximum read buffer size during handshake.
const HANDSHAKE_MAX_READ_BUF: usize =
    crate::frame::MAX_PAYLOAD_SIZE + crate::frame::HEADER_SIZE + 4096;

async fn recv_frame<T: AsyncRead + Unpin>(
    transport: &mut T,
    read_buf: &mut BytesMut,
) -> Result<Frame, Error> {
    let mut codec = FrameCodec::new();
    loop {
        if let Some(frame) = codec.decode(read_buf)? {
            return Ok(frame);
        }
        if read_buf.len() > HANDSHAKE_MAX_READ_BUF {
            return Err(HandshakeError::ReadBufferOverflow {
                size: read_buf.len(),
            }
            .into());
        }
        let n = transport.read_buf(read_buf).await?;
        if n == 0 {
            return Err(HandshakeError::Closed.into());
        }
    }
}

/// Validate that a handshake frame is a `Hello` with the expected sequence number.
fn validate_handshake_frame(frame: &Frame, expected_seq: u32) -> Result<(), HandshakeError> {
    if frame.header.msg_type != FrameType::Hello {
        return Err(HandshakeError::UnexpectedMessage {
            expected: "Hello",
            actual: format!("{:?}", frame.header.msg_type),
        });
    }
    if frame.header.sequence != expected_seq {
        return Err(HandshakeError::Failed(format!(
            "unexpected handshake sequence: expected {expected_seq}, got {}",
            frame.header.sequence
        )));
    }
    Ok(())
}

// -- Server (responder) side --

/// Read and parse the client hello.
pub async fn read_client_hello<T: AsyncRead + Unpin>(
    transport: &mut T,
    read_buf: &mut BytesMut,
) -> Result<ClientHello, Error> {
    let frame = recv_frame(transport, read_buf).await?;
    validate_handshake_frame(&frame, 0)?;
    Ok(parse_client_hello(&frame.payload)?)
}

/// Verify the client's quote and check that its report data binds the
/// handshake public key and nonce from the hello.
pub async fn verify_client_quote(
    hello: &ClientHello,
    verifier: &dyn QuoteVerifier,
) -> Result<VerifiedQuote, AttestError> {
    let verified = verifier.verify_quote(&hello.document).await?;

    match verified.public_key.as_deref() {
        Some(pk) if pk == hello.public_key.as_slice() => {}
        Some(_) => return Err(AttestError::PublicKeyMismatch),
        None => return Err(AttestError::MissingField("public_key".into())),
    }
    match verified.nonce.as_deref() {
        Some(nonce) if nonce == hello.nonce.as_slice() => {}
        Some(_) => {
            return Err(AttestError::VerificationFailed(
                "quote nonce does not match client hello".into(),
            ))
        }
        None => return Err(AttestError::MissingField("nonce".into())),
    }

    Ok(verified)
}

/// Refuse the client. Sends the generic error frame and nothing else.
pub async fn reject<T: AsyncWrite + Unpin>(transport: &mut T) -> Result<(), Error> {
    send_frame(transport, Frame::error(0, REJECTION_MESSAGE)).await
}

/// Answer an accepted client hello and finish the handshake.
pub async fn respond<T: AsyncRead + AsyncWrite + Unpin>(
    transport: &mut T,
    mut read_buf: BytesMut,
    hello: &ClientHello,
    identity: &ServerIdentity,
) -> Result<HandshakeResult, Error> {
    let keypair = KeyPair::generate();
    let nonce = random_nonce();
    let ephemeral = keypair.public.to_bytes();
    let static_key = identity.public_key();

    let server_hello = Frame::hello(0, encode_server_hello(&ephemeral, &nonce, &static_key))?;
    send_frame(transport, server_hello).await?;

    let doc_hash: [u8; 32] = Sha256::digest(&hello.document.raw).into();
    let combined_nonce = combine_nonces(&hello.nonce, &nonce);
    let transcript_hash = transcript::compute_transcript(
        &doc_hash,
        &hello.public_key,
        &ephemeral,
        &static_key,
        &combined_nonce,
    );

    let client_key = x25519_dalek::PublicKey::from(hello.public_key);
    let ephemeral_dh = kex::agree(&keypair.secret, &client_key)?;
    let static_dh = identity.agree(&client_key)?;
    let (send_key, recv_key) =
        kex::derive_session_keys(&ephemeral_dh, &static_dh, &transcript_hash, false)?;
    let session_id = derive_session_id(&transcript_hash)?;

    let confirm_frame = recv_frame(transport, &mut read_buf).await?;
    validate_handshake_frame(&confirm_frame, 1)?;

    let received_hash = parse_confirmation(&confirm_frame.payload)?;
    // The client's (send_key, recv_key) == our (recv_key, send_key).
    let expected_hash = compute_confirmation(&session_id, &recv_key, &send_key);
    if received_hash != expected_hash {
        return Err(HandshakeError::Failed(
            "confirmation hash mismatch: peer derived different keys".into(),
        )
        .into());
    }

    Ok(HandshakeResult {
        send_key,
        recv_key,
        session_id,
        residual: read_buf,
    })
}

// -- Client (initiator) side --

/// Run the client side of the handshake.
///
/// A server refusal surfaces as [`HandshakeError::Rejected`]; by protocol
/// design it carries no reason.
pub async fn initiate<T: AsyncRead + AsyncWrite + Unpin>(
    transport: &mut T,
    provider: &dyn QuoteProvider,
    expected_server_key: Option<&PublicKey>,
) -> Result<HandshakeResult, Error> {
    let keypair = KeyPair::generate();
    let nonce = random_nonce();
    let ephemeral = keypair.public.to_bytes();

    let doc = provider.quote(&ephemeral, &nonce).await.map_err(|e| {
        tracing::warn!(error = %e, "attestation generation failed");
        e
    })?;
    if doc.raw.len() > MAX_ATTESTATION_DOC_SIZE {
        return Err(AttestError::GenerationFailed(format!(
            "document too large: {} bytes (max {MAX_ATTESTATION_DOC_SIZE})",
            doc.raw.len()
        ))
        .into());
    }
    tracing::debug!(doc_len = doc.raw.len(), "attestation document generated");

    let hello = Frame::hello(0, encode_client_hello(&ephemeral, &nonce, &doc.raw))?;
    send_frame(transport, hello).await?;

    let mut read_buf = BytesMut::with_capacity(4096);
    let frame = recv_frame(transport, &mut read_buf).await?;
    if frame.header.msg_type == FrameType::Error {
        tracing::debug!("server refused the handshake");
        return Err(HandshakeError::Rejected.into());
    }
    validate_handshake_frame(&frame, 0)?;

    let (server_ephemeral, server_nonce, server_static) = parse_server_hello(&frame.payload)?;
    if let Some(pinned) = expected_server_key {
        if pinned != &server_static {
            return Err(HandshakeError::ServerKeyMismatch.into());
        }
    }

    let doc_hash: [u8; 32] = Sha256::digest(&doc.raw).into();
    let combined_nonce = combine_nonces(&nonce, &server_nonce);
    let transcript_hash = transcript::compute_transcript(
        &doc_hash,
        &ephemeral,
        &server_ephemeral,
        &server_static,
        &combined_nonce,
    );

    let ephemeral_dh = kex::agree(
        &keypair.secret,
        &x25519_dalek::PublicKey::from(server_ephemeral),
    )?;
    let static_dh = kex::agree(&keypair.secret, &x25519_dalek::PublicKey::from(server_static))?;
    let (send_key, recv_key) =
        kex::derive_session_keys(&ephemeral_dh, &static_dh, &transcript_hash, true)?;
    let session_id = derive_session_id(&transcript_hash)?;

    let confirmation_hash = compute_confirmation(&session_id, &send_key, &recv_key);
    let confirm_frame = Frame::hello(1, encode_confirmation(&confirmation_hash))?;
    send_frame(transport, confirm_frame).await?;

    Ok(HandshakeResult {
        send_key,
        recv_key,
        session_id,
        residual: read_buf,
    })
}
