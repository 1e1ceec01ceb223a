use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail, ensure};
use tracing::debug;

pub mod wire;

use wire::{BackendMode, NatsSecurityMode};

/// upper bound for `lease_duration` and `cleanup_interval`
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// validated runtime config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    lease_duration: Duration,
    cleanup_interval: Duration,
    store_timeout: Duration,
    backend: Backend,
    path: Option<PathBuf>,
}

/// the store the daemon should build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Nats(NatsConfig),
}

/// NATS connection and bucket settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    pub leases_bucket: String,
    /// bucket `max_age`, the store-side TTL of every key
    pub lease_max_age: Duration,
    pub replicas: usize,
    pub security_mode: NatsSecurityMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub nkey_seed_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub creds_file_path: Option<PathBuf>,
    pub connect_timeout: Option<Duration>,
    pub connect_retry_max: u32,
    pub request_timeout: Option<Duration>,
}

impl LockConfig {
    /// read and validate the YAML config at `path`
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::parse_str(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to find config at {}", &path.display()))?,
        )?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let wire: wire::Config =
            serde_yaml::from_str(s.as_ref()).context("failed to decode lock config")?;
        debug!(?wire);
        Self::try_from(wire)
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
    pub fn backend(&self) -> &Backend {
        &self.backend
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration: wire::default_lease_duration(),
            cleanup_interval: wire::default_cleanup_interval(),
            store_timeout: wire::default_store_timeout(),
            backend: Backend::Memory,
            path: None,
        }
    }
}

impl TryFrom<wire::Config> for LockConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::Config) -> Result<Self> {
        ensure!(
            cfg.lease_duration <= MAX_DURATION,
            "lease_duration ({:?}) must not exceed {:?}",
            cfg.lease_duration,
            MAX_DURATION
        );
        ensure!(
            cfg.cleanup_interval <= MAX_DURATION,
            "cleanup_interval ({:?}) must not exceed {:?}",
            cfg.cleanup_interval,
            MAX_DURATION
        );
        ensure!(
            cfg.store_timeout < cfg.lease_duration,
            "store_timeout ({:?}) must be shorter than lease_duration ({:?})",
            cfg.store_timeout,
            cfg.lease_duration
        );
        let backend = match (cfg.backend, cfg.nats) {
            (BackendMode::Memory, _) => Backend::Memory,
            (BackendMode::Nats, Some(nats)) => {
                Backend::Nats(NatsConfig::new(nats, cfg.lease_duration)?)
            }
            (BackendMode::Nats, None) => bail!("backend 'nats' requires a 'nats' section"),
        };
        Ok(Self {
            lease_duration: cfg.lease_duration,
            cleanup_interval: cfg.cleanup_interval,
            store_timeout: cfg.store_timeout,
            backend,
            path: None,
        })
    }
}

impl NatsConfig {
    fn new(nats: wire::NatsConfig, lease_max_age: Duration) -> Result<Self> {
        let servers = nats.servers.into_vec();
        ensure!(!servers.is_empty(), "nats.servers must not be empty");
        ensure!(
            is_valid_bucket(&nats.leases_bucket),
            "invalid nats.leases_bucket '{}', only [A-Za-z0-9_-] allowed",
            nats.leases_bucket
        );
        ensure!(nats.replicas > 0, "nats.replicas must be at least 1");
        Ok(Self {
            servers,
            leases_bucket: nats.leases_bucket,
            lease_max_age,
            replicas: nats.replicas,
            security_mode: nats.security_mode,
            username: nats.username,
            password: nats.password,
            token: nats.token,
            nkey_seed_path: nats.nkey_seed_path,
            tls_cert_path: nats.tls_cert_path,
            tls_key_path: nats.tls_key_path,
            tls_ca_path: nats.tls_ca_path,
            creds_file_path: nats.creds_file_path,
            connect_timeout: nats.connect_timeout,
            connect_retry_max: nats.connect_retry_max,
            request_timeout: nats.request_timeout,
        })
    }
}

fn is_valid_bucket(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    pub static EXAMPLE: &str = include_str!("../../../example.yaml");

    #[test]
    fn test_example_validates() {
        let cfg = LockConfig::parse_str(EXAMPLE).unwrap();
        assert_eq!(cfg.lease_duration(), Duration::from_secs(600));
        match cfg.backend() {
            Backend::Nats(nats) => {
                assert_eq!(nats.lease_max_age, Duration::from_secs(600));
                assert!(!nats.servers.is_empty());
            }
            other => panic!("expected nats backend, got {other:?}"),
        }
    }

    #[test]
    fn test_memory_default() {
        let cfg = LockConfig::parse_str("{}").unwrap();
        assert_eq!(cfg, LockConfig::default());
        assert_eq!(cfg.backend(), &Backend::Memory);
        assert_eq!(cfg.path(), None);
    }

    #[test]
    fn test_nats_requires_section() {
        let err = LockConfig::parse_str("backend: nats").unwrap_err();
        assert!(err.to_string().contains("requires a 'nats' section"));
    }

    #[test]
    fn test_store_timeout_shorter_than_lease() {
        assert!(LockConfig::parse_str("lease_duration: 2s\nstore_timeout: 2s").is_err());
        assert!(LockConfig::parse_str("lease_duration: 3s\nstore_timeout: 2s").is_ok());
    }

    #[test]
    fn test_durations_are_bounded() {
        let err = LockConfig::parse_str("lease_duration: 18446744073709551615").unwrap_err();
        assert!(err.to_string().contains("lease_duration"));
        assert!(LockConfig::parse_str("lease_duration: 25h").is_err());
        assert!(LockConfig::parse_str("cleanup_interval: 9999h").is_err());

        let cfg = LockConfig::parse_str("lease_duration: 24h\ncleanup_interval: 24h").unwrap();
        assert_eq!(cfg.lease_duration(), MAX_DURATION);
    }

    #[test]
    fn test_bucket_name() {
        let yaml = "backend: nats\nnats:\n  servers: [nats://a:4222]\n  leases_bucket: bad.name";
        assert!(LockConfig::parse_str(yaml).is_err());
        let yaml = "backend: nats\nnats:\n  servers: []";
        assert!(LockConfig::parse_str(yaml).is_err());
    }

    #[test]
    fn test_bucket_max_age_follows_lease_duration() {
        let yaml = "lease_duration: 15m\nbackend: nats\nnats:\n  servers: [nats://a:4222, nats://b:4222]";
        let cfg = LockConfig::parse_str(yaml).unwrap();
        let Backend::Nats(nats) = cfg.backend() else {
            panic!("expected nats backend");
        };
        assert_eq!(nats.lease_max_age, Duration::from_secs(900));
        assert_eq!(nats.servers.len(), 2);
    }
}
