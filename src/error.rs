use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::policy::MismatchField;

/// Errors from frame parsing and encoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid magic bytes: expected 0x5350, got 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("HKDF expand failed: invalid length")]
    HkdfExpandFailed,

    #[error("AEAD encryption failed")]
    SealFailed,

    #[error("AEAD decryption failed: ciphertext is invalid or tampered")]
    OpenFailed,

    #[error("nonce overflow: maximum sequence number reached")]
    NonceOverflow,

    #[error("sequence number replay: received {received}, expected > {expected}")]
    SequenceReplay { received: u64, expected: u64 },

    #[error("non-contributory key exchange: peer sent small-subgroup or identity point")]
    NonContributoryKey,
}

/// Errors from attestation document generation and quote verification.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    #[error("attestation generation failed: {0}")]
    GenerationFailed(String),

    #[error("quote verification failed: {0}")]
    VerificationFailed(String),

    #[error("quote verification did not finish within {0:?}")]
    VerificationTimeout(std::time::Duration),

    #[error("attestation does not bind the handshake public key")]
    PublicKeyMismatch,

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Errors raised while establishing or driving a provisioning session.
///
/// These abort the affected session only.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake failed: {0}")]
    Failed(String),

    #[error("unexpected handshake message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: String,
    },

    /// The server refused the session. Carries no detail by construction.
    #[error("provisioning rejected by server")]
    Rejected,

    #[error("server static key does not match the pinned key")]
    ServerKeyMismatch,

    #[error("session closed by peer")]
    Closed,

    #[error("handshake timeout")]
    Timeout,

    #[error("received unencrypted frame in established session")]
    UnencryptedFrame,

    #[error("read buffer overflow: {size} bytes exceeds maximum")]
    ReadBufferOverflow { size: usize },
}

/// The claimed measurements failed the configured policy.
///
/// Logged server-side with the offending field; never sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PolicyMismatch(pub MismatchField);

/// Malformed or missing configuration, credentials or secret source.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid hex in {field}: {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("invalid length for {field}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("server certificate does not match the private key")]
    IdentityMismatch,

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Attestation(#[from] AttestError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error is fatal for the whole process (as opposed to a
    /// single session).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Bind { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
