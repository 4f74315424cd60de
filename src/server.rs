use std::future::{self, Future};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

use crate::attestation::QuoteVerifier;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::identity::ServerIdentity;
use crate::secret::SecretStore;
use crate::session::provisioning::{ProvisioningContext, ProvisioningSession, SessionOutcome};
use crate::transport;
use crate::verifier::PolicyVerifier;

/// Accepts connections and runs one [`ProvisioningSession`] task per
/// connection.
pub struct ProvisioningServer {
    listener: TcpListener,
    ctx: Arc<ProvisioningContext>,
    limit: Option<Arc<Semaphore>>,
}

impl ProvisioningServer {
    /// Bind `addr`. `max_sessions == 0` means no bound on concurrent sessions.
    pub async fn bind(
        addr: SocketAddr,
        ctx: ProvisioningContext,
        max_sessions: usize,
    ) -> Result<Self, Error> {
        let listener = transport::listen(addr).await?;
        let limit = (max_sessions > 0).then(|| Arc::new(Semaphore::new(max_sessions)));
        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
            limit,
        })
    }

    /// Build everything from configuration: server identity, secret, policy,
    /// then bind. Any failure here is fatal for the process.
    pub async fn start(
        config: &ServerConfig,
        quote_verifier: Arc<dyn QuoteVerifier>,
    ) -> Result<Self, Error> {
        let server = &config.server;
        let identity = ServerIdentity::load(&server.cert_path, &server.key_path)?;
        let secret = SecretStore::initialize(server.secret_path.as_deref())?;
        let policy = config.policy()?;

        if policy.pinned_fields() == 0 {
            tracing::warn!("measurement policy pins no fields: any attested enclave will be provisioned");
        }
        tracing::info!(
            policy = ?policy,
            pinned_fields = policy.pinned_fields(),
            "measurement policy loaded"
        );
        tracing::info!(
            secret_len = secret.get().len(),
            fingerprint = %secret.get().fingerprint(),
            external = server.secret_path.is_some(),
            "wrapping key ready"
        );

        let ctx = ProvisioningContext {
            identity,
            secret,
            quote_verifier,
            verifier: Arc::new(PolicyVerifier::new(Arc::new(policy))),
            config: config.session_config()?,
        };

        Self::bind(config.bind_addr(), ctx, server.max_sessions).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process exits.
    pub async fn serve(self) -> Result<(), Error> {
        self.serve_with_shutdown(future::pending()).await
    }

    /// Serve until `signal` resolves, then stop accepting and wait for
    /// in-flight sessions to finish.
    pub async fn serve_with_shutdown<S>(self, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "provisioning server listening");

        let tracker = TaskTracker::new();
        tokio::pin!(signal);

        loop {
            let permit = tokio::select! {
                _ = &mut signal => break,
                permit = acquire(self.limit.as_ref()) => permit,
            };

            let (stream, peer_addr) = tokio::select! {
                _ = &mut signal => break,
                accepted = transport::accept(&self.listener) => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            let ctx = Arc::clone(&self.ctx);
            tracker.spawn(async move {
                let _permit = permit;
                tracing::debug!(%peer_addr, "accepted connection");

                let mut session = ProvisioningSession::new(stream, ctx).with_peer(peer_addr);
                match session.run().await {
                    SessionOutcome::Provisioned { acknowledged } => {
                        tracing::info!(%peer_addr, acknowledged, "secret provisioned");
                    }
                    SessionOutcome::Rejected(reason) => {
                        tracing::info!(%peer_addr, %reason, "session rejected");
                    }
                    SessionOutcome::Failed(e) => {
                        tracing::warn!(%peer_addr, error = %e, "session failed");
                    }
                }
            });
        }

        tracker.close();
        tracing::info!(in_flight = tracker.len(), "shutting down, waiting for sessions");
        tracker.wait().await;
        Ok(())
    }
}

/// Wait for a session slot. Unlimited servers never wait.
async fn acquire(limit: Option<&Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match limit {
        // The semaphore is never closed, so acquisition cannot fail.
        Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
        None => None,
    }
}
