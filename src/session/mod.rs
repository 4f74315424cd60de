pub mod channel;
pub mod handshake;
pub mod provisioning;
pub mod retry;

use std::time::Duration;

use crate::crypto::PublicKey;
use crate::error::ConfigError;

use self::retry::RetryPolicy;

/// Configuration shared by both ends of a provisioning session.
///
/// The cipher suite is fixed: X25519 + HKDF-SHA256 + ChaCha20-Poly1305.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum time for each network phase of the handshake (default: 30s).
    pub handshake_timeout: Duration,

    /// How long the server waits for the client's acknowledgement after
    /// sending the secret (default: 10s).
    pub ack_timeout: Duration,

    /// Client only: retry policy for establishing the TCP connection.
    pub retry_policy: Option<RetryPolicy>,

    /// Client only: the server static key to pin. `None` accepts any server.
    pub expected_server_key: Option<PublicKey>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            retry_policy: None,
            expected_server_key: None,
        }
    }
}

impl SessionConfig {
    /// Create a builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    handshake_timeout: Duration,
    ack_timeout: Duration,
    retry_policy: Option<RetryPolicy>,
    expected_server_key: Option<PublicKey>,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            handshake_timeout: defaults.handshake_timeout,
            ack_timeout: defaults.ack_timeout,
            retry_policy: None,
            expected_server_key: None,
        }
    }
}

impl SessionConfigBuilder {
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn expected_server_key(mut self, key: PublicKey) -> Self {
        self.expected_server_key = Some(key);
        self
    }

    /// Build the `SessionConfig`, validating that all values are sensible.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "handshake_timeout",
                reason: "must be > 0".into(),
            });
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "ack_timeout",
                reason: "must be > 0".into(),
            });
        }
        Ok(SessionConfig {
            handshake_timeout: self.handshake_timeout,
            ack_timeout: self.ack_timeout,
            retry_policy: self.retry_policy,
            expected_server_key: self.expected_server_key,
        })
    }
}
