use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::attestation::QuoteVerifier;
use crate::error::{AttestError, Error, HandshakeError, PolicyMismatch};
use crate::identity::ServerIdentity;
use crate::secret::SecretStore;
use crate::verifier::{MeasurementVerifier, VerifyResult};

use super::channel::{Message, SecureChannel};
use super::handshake;
use super::SessionConfig;

/// Everything a session needs, built once at startup and shared read-only.
pub struct ProvisioningContext {
    pub identity: ServerIdentity,
    pub secret: SecretStore,
    pub quote_verifier: Arc<dyn QuoteVerifier>,
    pub verifier: Arc<dyn MeasurementVerifier>,
    pub config: SessionConfig,
}

impl fmt::Debug for ProvisioningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningContext")
            .field("identity", &self.identity)
            .field("secret", &self.secret)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of one provisioning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Verifying,
    Provisioning,
    Rejected,
    Closed,
}

/// Why a client was refused. Logged server-side only.
#[derive(Debug)]
pub enum RejectReason {
    /// The quote was malformed, unsigned, or not bound to the handshake.
    InvalidQuote(AttestError),
    /// The quote was genuine but its measurements failed the policy.
    Policy(PolicyMismatch),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidQuote(e) => write!(f, "invalid quote: {e}"),
            RejectReason::Policy(m) => write!(f, "{m}"),
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The secret was written. `acknowledged` is false if the client closed
    /// or timed out instead of acknowledging.
    Provisioned { acknowledged: bool },
    Rejected(RejectReason),
    Failed(Error),
}

impl SessionOutcome {
    pub fn is_provisioned(&self) -> bool {
        matches!(self, SessionOutcome::Provisioned { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, SessionOutcome::Rejected(_))
    }
}

/// Drives a single connection from handshake to close. Single-shot: any
/// error closes the session without retry.
pub struct ProvisioningSession<T> {
    transport: T,
    peer: String,
    state: SessionState,
    verdict: Option<VerifyResult>,
    ctx: Arc<ProvisioningContext>,
}

impl<T> ProvisioningSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(transport: T, ctx: Arc<ProvisioningContext>) -> Self {
        Self {
            transport,
            peer: "unknown".to_string(),
            state: SessionState::AwaitingHandshake,
            verdict: None,
            ctx,
        }
    }

    /// Label used in log lines, usually the peer address.
    pub fn with_peer(mut self, peer: impl fmt::Display) -> Self {
        self.peer = peer.to_string();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The policy verdict, once the session has passed `Verifying`.
    pub fn verdict(&self) -> Option<VerifyResult> {
        self.verdict
    }

    /// Run the session to completion. Always ends in [`SessionState::Closed`].
    pub async fn run(&mut self) -> SessionOutcome {
        let outcome = match self.drive().await {
            Ok(outcome) => outcome,
            Err(e) => SessionOutcome::Failed(e),
        };
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(peer = %self.peer, error = %e, "transport shutdown failed");
        }
        self.transition(SessionState::Closed);
        outcome
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(peer = %self.peer, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    async fn drive(&mut self) -> Result<SessionOutcome, Error> {
        let ctx = Arc::clone(&self.ctx);
        let timeout = ctx.config.handshake_timeout;

        let mut read_buf = BytesMut::with_capacity(4096);
        let hello = with_timeout(
            timeout,
            handshake::read_client_hello(&mut self.transport, &mut read_buf),
        )
        .await?;

        self.transition(SessionState::Verifying);
        let verification = tokio::time::timeout(
            timeout,
            handshake::verify_client_quote(&hello, ctx.quote_verifier.as_ref()),
        )
        .await
        .unwrap_or(Err(AttestError::VerificationTimeout(timeout)));
        let rejection = match verification {
            Ok(quote) => {
                let verdict = ctx.verifier.verify(&quote.measurements);
                self.verdict = Some(verdict);
                verdict.into_result().err().map(RejectReason::Policy)
            }
            Err(e) => Some(RejectReason::InvalidQuote(e)),
        };

        if let Some(reason) = rejection {
            self.transition(SessionState::Rejected);
            tracing::warn!(peer = %self.peer, %reason, "rejecting client");
            if let Err(e) = handshake::reject(&mut self.transport).await {
                tracing::debug!(peer = %self.peer, error = %e, "failed to send rejection");
            }
            return Ok(SessionOutcome::Rejected(reason));
        }

        self.transition(SessionState::Provisioning);
        let result = with_timeout(
            timeout,
            handshake::respond(&mut self.transport, read_buf, &hello, &ctx.identity),
        )
        .await?;

        let mut channel = SecureChannel::new(&mut self.transport, result);
        channel.send(ctx.secret.get().as_bytes()).await?;
        tracing::debug!(peer = %self.peer, "secret sent, awaiting acknowledgement");

        let acknowledged = match tokio::time::timeout(ctx.config.ack_timeout, channel.recv()).await {
            Ok(Ok(Message::Shutdown)) => true,
            Ok(Ok(other)) => {
                tracing::warn!(peer = %self.peer, message = ?other, "unexpected message instead of acknowledgement");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(peer = %self.peer, error = %e, "no acknowledgement from client");
                false
            }
            Err(_) => {
                tracing::warn!(peer = %self.peer, "acknowledgement timed out");
                false
            }
        };

        Ok(SessionOutcome::Provisioned { acknowledged })
    }
}

async fn with_timeout<F, R>(duration: Duration, fut: F) -> Result<R, Error>
where
    F: Future<Output = Result<R, Error>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| Error::Handshake(HandshakeError::Timeout))?
}
