//! On-disk configuration: identity (certificate/key), listen address, trust list, route table,
//! and the pool/deadline durations the rest of the runtime is constructed from. Loaded once at
//! startup by the demo binaries via [`Config::load`].

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use transport::Identity;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: support::logging::LoggingConfig,

    pub listen_address: Option<SocketAddr>,
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,

    #[serde(default)]
    pub trust: Vec<String>,

    #[serde(default)]
    pub routes: Vec<RouteEntry>,

    /// If present, this runtime also dials out as `MX-SUBSCRIBER` against `endpoint`, serving
    /// requests the remote queues under `subscription_uri` for it.
    #[serde(default)]
    pub poll: Option<PollSubscription>,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub deadlines: DeadlineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub to: String,
    pub via: String,
    pub via_thumbprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSubscription {
    pub subscription_uri: String,
    pub endpoint: String,
    pub endpoint_thumbprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_idle_per_endpoint")]
    pub max_idle_per_endpoint: usize,
    #[serde(default = "default_max_idle_duration", with = "humantime_serde")]
    pub max_idle_duration: Duration,
}

fn default_max_idle_per_endpoint() -> usize {
    8
}

fn default_max_idle_duration() -> Duration {
    Duration::from_secs(120)
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_idle_per_endpoint: default_max_idle_per_endpoint(),
            max_idle_duration: default_max_idle_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineSettings {
    #[serde(default = "default_idle_deadline", with = "humantime_serde")]
    pub idle_deadline: Duration,
    #[serde(default = "default_poll_grace", with = "humantime_serde")]
    pub poll_grace: Duration,
    #[serde(default = "default_collection_deadline", with = "humantime_serde")]
    pub collection_deadline: Duration,
    #[serde(default = "default_response_deadline", with = "humantime_serde")]
    pub response_deadline: Duration,
}

fn default_idle_deadline() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_grace() -> Duration {
    Duration::from_millis(500)
}

fn default_collection_deadline() -> Duration {
    Duration::from_secs(30)
}

fn default_response_deadline() -> Duration {
    Duration::from_secs(30)
}

impl Default for DeadlineSettings {
    fn default() -> Self {
        DeadlineSettings {
            idle_deadline: default_idle_deadline(),
            poll_grace: default_poll_grace(),
            collection_deadline: default_collection_deadline(),
            response_deadline: default_response_deadline(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        serdeconv::from_toml_file(path.as_ref()).map_err(ConfigError::Parse)
    }

    pub fn load_identity(&self) -> Result<Identity, ConfigError> {
        load_identity(&self.certificate_path, &self.private_key_path)
    }
}

/// Parses a PEM certificate chain and private key off disk into the pair TLS configuration needs.
pub fn load_identity(certificate_path: &Path, private_key_path: &Path) -> Result<Identity, ConfigError> {
    let cert_file = File::open(certificate_path).map_err(|source| ConfigError::Read {
        path: certificate_path.display().to_string(),
        source,
    })?;
    let cert_chain: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|source| ConfigError::Read { path: certificate_path.display().to_string(), source })?;
    if cert_chain.is_empty() {
        return Err(ConfigError::MissingCertificate(certificate_path.display().to_string()));
    }

    let key_file = File::open(private_key_path).map_err(|source| ConfigError::Read {
        path: private_key_path.display().to_string(),
        source,
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|source| ConfigError::Read { path: private_key_path.display().to_string(), source })?
        .ok_or_else(|| ConfigError::MissingPrivateKey(private_key_path.display().to_string()))?;

    Ok(Identity { cert_chain, key: Arc::new(key) })
}
