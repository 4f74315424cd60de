use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::attestation::QuoteProvider;
use crate::error::{Error, HandshakeError};
use crate::secret::SecretMaterial;
use crate::session::channel::{Message, SecureChannel};
use crate::session::handshake;
use crate::session::retry::{with_retry, RetryPolicy};
use crate::session::SessionConfig;
use crate::transport;

/// The attested workload's side of the protocol: prove identity, receive
/// the wrapping key, acknowledge.
pub struct ProvisioningClient {
    provider: Arc<dyn QuoteProvider>,
    config: SessionConfig,
}

impl ProvisioningClient {
    pub fn new(provider: Arc<dyn QuoteProvider>, config: SessionConfig) -> Self {
        Self { provider, config }
    }

    /// Run one provisioning exchange over an already-connected transport.
    pub async fn fetch<T>(&self, mut transport: T) -> Result<SecretMaterial, Error>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let result = tokio::time::timeout(
            self.config.handshake_timeout,
            handshake::initiate(
                &mut transport,
                self.provider.as_ref(),
                self.config.expected_server_key.as_ref(),
            ),
        )
        .await
        .map_err(|_| HandshakeError::Timeout)??;

        let mut channel = SecureChannel::new(transport, result);
        let secret = match channel.recv().await? {
            Message::Data(bytes) => SecretMaterial::new(bytes.to_vec()),
            Message::Error(_) => return Err(HandshakeError::Rejected.into()),
            Message::Shutdown => return Err(HandshakeError::Closed.into()),
        };
        tracing::info!(
            len = secret.len(),
            fingerprint = %secret.fingerprint(),
            "secret received"
        );

        channel.shutdown().await?;
        channel.close().await.ok();
        Ok(secret)
    }

    /// Connect to `addr` (retrying per the configured policy) and fetch.
    pub async fn fetch_tcp(&self, addr: SocketAddr) -> Result<SecretMaterial, Error> {
        let policy = self
            .config
            .retry_policy
            .clone()
            .unwrap_or_else(RetryPolicy::none);
        let stream = with_retry(&policy, || transport::connect(addr)).await?;
        self.fetch(stream).await
    }
}
