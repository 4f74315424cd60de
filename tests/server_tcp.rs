#![cfg(feature = "mock")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use attested_secret_prov::error::{ConfigError, HandshakeError};
use attested_secret_prov::{
    ClaimedMeasurements, Error, MeasurementPolicy, MockProvider, MockVerifier, PolicyVerifier,
    ProvisioningClient, ProvisioningContext, ProvisioningServer, RetryPolicy, SecretStore,
    ServerConfig, ServerIdentity, SessionConfig,
};

const GOOD: ClaimedMeasurements = ClaimedMeasurements {
    mr_enclave: [0xAA; 32],
    mr_signer: [0xBB; 32],
    isv_prod_id: 1,
    isv_svn: 2,
};

fn context(secret: &[u8]) -> ProvisioningContext {
    let policy = MeasurementPolicy::new(GOOD.mr_enclave, GOOD.mr_signer, 1, 2);
    ProvisioningContext {
        identity: ServerIdentity::generate(),
        secret: SecretStore::from_bytes(secret.to_vec()).unwrap(),
        quote_verifier: Arc::new(MockVerifier::new()),
        verifier: Arc::new(PolicyVerifier::new(Arc::new(policy))),
        config: SessionConfig::default(),
    }
}

fn client(claimed: ClaimedMeasurements) -> ProvisioningClient {
    ProvisioningClient::new(Arc::new(MockProvider::new(claimed)), SessionConfig::default())
}

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<attested_secret_prov::Result<()>>,
}

impl Running {
    async fn stop(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn spawn(server: ProvisioningServer) -> Running {
    let addr = server.local_addr().unwrap();
    let (stop, rx) = oneshot::channel();
    let handle = tokio::spawn(server.serve_with_shutdown(async {
        rx.await.ok();
    }));
    Running { addr, stop, handle }
}

async fn start(secret: &[u8], max_sessions: usize) -> Running {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = ProvisioningServer::bind(addr, context(secret), max_sessions)
        .await
        .unwrap();
    spawn(server)
}

#[tokio::test]
async fn fifty_concurrent_mixed_sessions() {
    let secret = [0x11u8; 16];
    let server = start(&secret, 0).await;

    let mut tasks = Vec::new();
    for i in 0..50u16 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let accepted = i % 2 == 0;
            let claimed = if accepted {
                GOOD
            } else {
                ClaimedMeasurements {
                    isv_svn: 100 + i,
                    ..GOOD
                }
            };
            (accepted, client(claimed).fetch_tcp(addr).await)
        }));
    }

    for task in tasks {
        let (accepted, result) = task.await.unwrap();
        if accepted {
            assert_eq!(result.unwrap().as_bytes(), &secret);
        } else {
            assert!(matches!(
                result,
                Err(Error::Handshake(HandshakeError::Rejected))
            ));
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn session_limit_holds_back_extra_clients() {
    let secret = [0x22u8; 16];
    let server = start(&secret, 1).await;

    // Occupies the only slot without ever sending a hello.
    let idle = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let blocked = tokio::time::timeout(
        Duration::from_millis(300),
        client(GOOD).fetch_tcp(server.addr),
    )
    .await;
    assert!(blocked.is_err(), "second session served while the slot was taken");

    drop(idle);
    let secret_out = tokio::time::timeout(Duration::from_secs(5), client(GOOD).fetch_tcp(server.addr))
        .await
        .expect("slot was not released")
        .unwrap();
    assert_eq!(secret_out.as_bytes(), &secret);

    server.stop().await;
}

#[tokio::test]
async fn bind_conflict_is_fatal() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let err = ProvisioningServer::bind(addr, context(&[0u8; 16]), 0)
        .await
        .err()
        .expect("bind should fail");
    assert!(matches!(err, Error::Bind { addr: a, .. } if a == addr));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn client_retries_until_server_is_up() {
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };

    let secret = [0x33u8; 16];
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let server = ProvisioningServer::bind(addr, context(&secret), 0)
            .await
            .unwrap();
        spawn(server)
    });

    let config = SessionConfig::builder()
        .retry_policy(RetryPolicy {
            max_retries: 20,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 1.5,
        })
        .build()
        .unwrap();
    let client = ProvisioningClient::new(Arc::new(MockProvider::new(GOOD)), config);

    let fetched = client.fetch_tcp(addr).await.unwrap();
    assert_eq!(fetched.as_bytes(), &secret);

    late.await.unwrap().stop().await;
}

#[tokio::test]
async fn client_without_retry_fails_fast() {
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };
    let result = client(GOOD).fetch_tcp(addr).await;
    assert!(matches!(result, Err(Error::Io(_))));
}

#[tokio::test]
async fn start_from_config_files() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("server.pub");
    let key = dir.path().join("server.key");
    let secret_path = dir.path().join("secret.key");

    let identity = ServerIdentity::generate();
    identity.write(&cert, &key).unwrap();
    std::fs::write(&secret_path, [0x44u8; 16]).unwrap();

    let toml = format!(
        r#"
[server]
port = 0
cert_path = '{}'
key_path = '{}'
secret_path = '{}'
max_sessions = 4

[policy]
mr_signer = "{}"
"#,
        cert.display(),
        key.display(),
        secret_path.display(),
        hex::encode(GOOD.mr_signer),
    );
    let config = ServerConfig::from_toml_str(&toml).unwrap();

    let server = ProvisioningServer::start(&config, Arc::new(MockVerifier::new()))
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    let running = spawn(server);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let pinned = SessionConfig::builder()
        .expected_server_key(identity.public_key())
        .build()
        .unwrap();
    let client = ProvisioningClient::new(
        Arc::new(MockProvider::new(ClaimedMeasurements {
            mr_enclave: [0x01; 32],
            ..GOOD
        })),
        pinned,
    );
    let fetched = client.fetch_tcp(addr).await.unwrap();
    assert_eq!(fetched.as_bytes(), &[0x44u8; 16]);

    running.stop().await;
}

#[tokio::test]
async fn start_without_credentials_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        "[server]\nport = 0\ncert_path = '{}'\nkey_path = '{}'\n",
        dir.path().join("missing.pub").display(),
        dir.path().join("missing.key").display(),
    );
    let config = ServerConfig::from_toml_str(&toml).unwrap();

    let err = ProvisioningServer::start(&config, Arc::new(MockVerifier::new()))
        .await
        .err()
        .expect("startup should fail");
    assert!(matches!(err, Error::Config(ConfigError::Read { .. })));
    assert!(err.is_fatal());
}
