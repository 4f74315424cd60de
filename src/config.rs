//! TOML configuration for the provisioning server.
//!
//! ```toml
//! [server]
//! port = 4433
//! cert_path = "certs/server.pub"
//! key_path = "certs/server.key"
//! secret_path = "secret.key"
//! max_sessions = 256
//! handshake_timeout_secs = 30
//!
//! [policy]
//! mr_enclave = "<64 hex chars>"
//! mr_signer = "<64 hex chars>"
//! isv_prod_id = 0
//! isv_svn = 0
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::MeasurementPolicy;
use crate::session::SessionConfig;

pub const DEFAULT_PORT: u16 = 4433;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub policy: PolicySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// External wrapping key. A fresh key is generated when absent.
    pub secret_path: Option<PathBuf>,
    /// Upper bound on concurrent sessions; 0 means unlimited.
    pub max_sessions: usize,
    pub handshake_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cert_path: PathBuf::from("certs/server.pub"),
            key_path: PathBuf::from("certs/server.key"),
            secret_path: None,
            max_sessions: 256,
            handshake_timeout_secs: 30,
        }
    }
}

/// Expected client identity. Absent, empty or zero fields accept any value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySection {
    pub mr_enclave: Option<String>,
    pub mr_signer: Option<String>,
    pub isv_prod_id: u16,
    pub isv_svn: u16,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `path` and apply command-line overrides. A missing file is an
    /// error: the policy lives in it, and running without one would accept
    /// any enclave.
    pub fn load_with_overrides(path: &Path, port: Option<u16>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        if let Some(port) = port {
            config.server.port = port;
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.server.port))
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        SessionConfig::builder()
            .handshake_timeout(Duration::from_secs(self.server.handshake_timeout_secs))
            .build()
    }

    pub fn policy(&self) -> Result<MeasurementPolicy, ConfigError> {
        let p = &self.policy;
        Ok(MeasurementPolicy::new(
            parse_measurement(p.mr_enclave.as_deref(), "mr_enclave")?,
            parse_measurement(p.mr_signer.as_deref(), "mr_signer")?,
            p.isv_prod_id,
            p.isv_svn,
        ))
    }
}

fn parse_measurement(value: Option<&str>, field: &'static str) -> Result<[u8; 32], ConfigError> {
    let text = match value.map(str::trim) {
        None | Some("") => return Ok([0u8; 32]),
        Some(text) => text.strip_prefix("0x").unwrap_or(text),
    };

    let bytes = hex::decode(text).map_err(|source| ConfigError::InvalidHex { field, source })?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| ConfigError::InvalidLength {
        field,
        expected: 32,
        actual,
    })
}
