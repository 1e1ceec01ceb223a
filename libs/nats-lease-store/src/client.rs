//! NATS connection manager with reconnect/backoff and optional auth/encryption.
//!
//! Wraps `async-nats` to provide a resilient connection layer. Security mode
//! support is flexible: none, user/password, token, nkey, tls, and creds-file
//! modes are all optional runtime choices.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_nats::ConnectOptions;
use async_nats::jetstream;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use config::NatsConfig;
use config::wire::NatsSecurityMode;

use crate::error::{NatsStoreError, NatsStoreResult};

/// Default connection timeout if not configured.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout if not configured.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Base delay for retrying initial NATS connections.
const CONNECT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for retry backoff during initial NATS connect.
const MAX_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Lease keys are never updated in place, one revision is enough.
const LEASE_BUCKET_HISTORY: i64 = 1;

/// Connection state observable by consumers for health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected and operating normally.
    Connected,
    /// Attempting to reconnect after a failure.
    Reconnecting,
    /// Not connected; connection was never established or has been shut down.
    Disconnected,
}

struct ClientInner {
    nats_client: Option<async_nats::Client>,
    state: ConnectionState,
    config: NatsConfig,
}

/// NATS connection manager for the lease bucket.
///
/// Provides:
/// - Connection bootstrap from `NatsConfig`
/// - Automatic reconnection (handled by async-nats internally)
/// - Optional security mode configuration
/// - Current connection state for health checks
/// - Bucket bootstrap with the lease TTL as `max_age`
#[derive(Clone)]
pub struct NatsClient {
    inner: Arc<RwLock<ClientInner>>,
}

impl NatsClient {
    /// Create a new client from nats configuration, without connecting yet.
    ///
    /// Call [`connect`](Self::connect) to establish the NATS connection.
    pub fn new(config: NatsConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ClientInner {
                nats_client: None,
                state: ConnectionState::Disconnected,
                config,
            })),
        }
    }

    /// Build connect options from the nats config, applying the selected security mode.
    async fn build_connect_options(config: &NatsConfig) -> NatsStoreResult<ConnectOptions> {
        let mut opts = ConnectOptions::new();

        match &config.security_mode {
            NatsSecurityMode::None => {}
            NatsSecurityMode::UserPassword => {
                let user = config.username.as_deref().ok_or_else(|| {
                    NatsStoreError::Config("user_password security mode requires 'username'".into())
                })?;
                let pass = config.password.as_deref().ok_or_else(|| {
                    NatsStoreError::Config("user_password security mode requires 'password'".into())
                })?;
                opts = opts.user_and_password(user.into(), pass.into());
            }
            NatsSecurityMode::Token => {
                let token = config.token.as_deref().ok_or_else(|| {
                    NatsStoreError::Config("token security mode requires 'token'".into())
                })?;
                opts = opts.token(token.into());
            }
            NatsSecurityMode::Nkey => {
                let seed_path = config.nkey_seed_path.as_ref().ok_or_else(|| {
                    NatsStoreError::Config("nkey security mode requires 'nkey_seed_path'".into())
                })?;
                let seed = std::fs::read_to_string(seed_path).map_err(|e| {
                    NatsStoreError::Config(format!(
                        "failed to read nkey seed file '{}': {e}",
                        seed_path.display()
                    ))
                })?;
                opts = opts.nkey(seed.trim().to_string());
            }
            NatsSecurityMode::Tls => {
                let cert_path = config.tls_cert_path.as_ref().ok_or_else(|| {
                    NatsStoreError::Config("tls security mode requires 'tls_cert_path'".into())
                })?;
                let key_path = config.tls_key_path.as_ref().ok_or_else(|| {
                    NatsStoreError::Config("tls security mode requires 'tls_key_path'".into())
                })?;
                opts = opts.add_client_certificate(cert_path.clone(), key_path.clone());
                if let Some(ca_path) = &config.tls_ca_path {
                    opts = opts.add_root_certificates(ca_path.clone());
                }
                opts = opts.require_tls(true);
            }
            NatsSecurityMode::CredsFile => {
                let creds_path = config.creds_file_path.as_ref().ok_or_else(|| {
                    NatsStoreError::Config(
                        "creds_file security mode requires 'creds_file_path'".into(),
                    )
                })?;
                opts = opts.credentials_file(creds_path).await.map_err(|e| {
                    NatsStoreError::Config(format!(
                        "failed to load credentials file '{}': {e}",
                        creds_path.display()
                    ))
                })?;
            }
        }

        // server-side TLS verification works with any auth mode
        if config.security_mode != NatsSecurityMode::Tls {
            if let Some(ca_path) = &config.tls_ca_path {
                opts = opts.add_root_certificates(ca_path.clone());
                opts = opts.require_tls(true);
            }
        }

        let connect_timeout = config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        opts = opts
            .connection_timeout(connect_timeout)
            .request_timeout(Some(config.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)))
            .retry_on_initial_connect();

        Ok(opts)
    }

    /// Establish the NATS connection.
    ///
    /// Retries with exponential backoff up to `connect_retry_max` times. On
    /// success the client transitions to `Connected`; async-nats handles
    /// reconnection internally after that.
    pub async fn connect(&self) -> NatsStoreResult<()> {
        let (config, current_state) = {
            let inner = self.inner.read().await;
            (inner.config.clone(), inner.state)
        };

        if current_state == ConnectionState::Connected {
            debug!("NATS client already connected, skipping connect");
            return Ok(());
        }

        info!(
            servers = ?config.servers,
            security_mode = ?config.security_mode,
            connect_retry_max = config.connect_retry_max,
            "connecting to NATS"
        );

        {
            let mut inner = self.inner.write().await;
            inner.nats_client = None;
            inner.state = ConnectionState::Reconnecting;
        }

        let total_attempts = config.connect_retry_max.saturating_add(1);
        let mut attempt = 0;
        loop {
            let opts = match Self::build_connect_options(&config).await {
                Ok(opts) => opts,
                Err(err) => {
                    self.inner.write().await.state = ConnectionState::Disconnected;
                    return Err(err);
                }
            };

            let err = match opts.connect(config.servers.clone()).await {
                Ok(client) => {
                    let mut inner = self.inner.write().await;
                    inner.nats_client = Some(client);
                    inner.state = ConnectionState::Connected;
                    info!(
                        attempt = attempt + 1,
                        total_attempts, "NATS connection established"
                    );
                    return Ok(());
                }
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= total_attempts {
                error!(
                    attempts = total_attempts,
                    error = %err,
                    "NATS connection failed after all retry attempts"
                );
                self.inner.write().await.state = ConnectionState::Disconnected;
                return Err(NatsStoreError::Transport(format!(
                    "NATS connection failed after {total_attempts} attempt(s): {err}"
                )));
            }

            let delay = CONNECT_RETRY_BASE_DELAY
                .saturating_mul(2u32.saturating_pow(attempt - 1))
                .min(MAX_CONNECT_RETRY_DELAY);
            warn!(
                attempt,
                total_attempts,
                retry_in_ms = delay.as_millis(),
                error = %err,
                "NATS connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Returns the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        let inner = self.inner.read().await;
        if let Some(ref client) = inner.nats_client {
            match client.connection_state() {
                async_nats::connection::State::Connected => ConnectionState::Connected,
                async_nats::connection::State::Disconnected => ConnectionState::Reconnecting,
                async_nats::connection::State::Pending => ConnectionState::Reconnecting,
            }
        } else {
            inner.state
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_state().await == ConnectionState::Connected
    }

    /// Return configured leases KV bucket name.
    pub async fn leases_bucket(&self) -> String {
        self.inner.read().await.config.leases_bucket.clone()
    }

    /// Return the `max_age` the leases bucket is created with.
    pub async fn lease_max_age(&self) -> Duration {
        self.inner.read().await.config.lease_max_age
    }

    /// Open the leases bucket, creating it with the configured `max_age` and
    /// replica count if it does not exist yet.
    pub async fn leases_store(&self) -> NatsStoreResult<jetstream::kv::Store> {
        let (bucket, max_age, replicas) = {
            let inner = self.inner.read().await;
            (
                inner.config.leases_bucket.clone(),
                inner.config.lease_max_age,
                inner.config.replicas,
            )
        };
        self.get_or_create_kv_bucket(jetstream::kv::Config {
            bucket,
            history: LEASE_BUCKET_HISTORY,
            max_age,
            num_replicas: replicas,
            description: "booking lock leases".into(),
            ..Default::default()
        })
        .await
    }

    /// Run a startup write-path selftest against the lease KV bucket.
    ///
    /// Verifies JetStream KV is reachable for write/read/delete before the
    /// process reports healthy.
    pub async fn startup_write_selftest(&self) -> NatsStoreResult<()> {
        let bucket = self.leases_bucket().await;
        let store = self.leases_store().await?;

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let probe_key = format!("startup/selftest/{nonce}");
        let probe_value = format!("booking-lock-startup-selftest-{nonce}");

        store
            .put(&probe_key, probe_value.clone().into_bytes().into())
            .await
            .map_err(|e| {
                NatsStoreError::Transport(format!(
                    "nats write selftest put failed for key '{probe_key}': {e}"
                ))
            })?;

        let stored = store.get(probe_key.clone()).await.map_err(|e| {
            NatsStoreError::Transport(format!(
                "nats write selftest get failed for key '{probe_key}': {e}"
            ))
        })?;

        let Some(stored) = stored else {
            return Err(NatsStoreError::Transport(format!(
                "nats write selftest get returned no value for key '{probe_key}'"
            )));
        };

        if stored.as_ref() != probe_value.as_bytes() {
            return Err(NatsStoreError::Transport(format!(
                "nats write selftest value mismatch for key '{probe_key}'"
            )));
        }

        store.purge(&probe_key).await.map_err(|e| {
            NatsStoreError::Transport(format!(
                "nats write selftest purge failed for key '{probe_key}': {e}"
            ))
        })?;

        info!(bucket, key = %probe_key, "nats startup write selftest passed");
        Ok(())
    }

    async fn jetstream_context(&self) -> NatsStoreResult<jetstream::Context> {
        let client = self.nats_client().await?;
        Ok(jetstream::new(client))
    }

    /// Get an existing KV bucket or create it from `config` if missing.
    pub async fn get_or_create_kv_bucket(
        &self,
        config: jetstream::kv::Config,
    ) -> NatsStoreResult<jetstream::kv::Store> {
        let js = self.jetstream_context().await?;
        let bucket = config.bucket.clone();
        match js.get_key_value(bucket.clone()).await {
            Ok(store) => Ok(store),
            Err(get_err) => {
                debug!(bucket, error = %get_err, "creating missing JetStream KV bucket");
                js.create_key_value(config).await.map_err(|create_err| {
                    NatsStoreError::Transport(format!(
                        "failed to create JetStream KV bucket '{bucket}': {create_err} (get error: {get_err})"
                    ))
                })
            }
        }
    }

    async fn nats_client(&self) -> NatsStoreResult<async_nats::Client> {
        self.inner
            .read()
            .await
            .nats_client
            .clone()
            .ok_or_else(|| NatsStoreError::NotConnected("NATS client not connected".into()))
    }

    /// Shut down the client, transitioning to Disconnected state.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.write().await;
        inner.nats_client = None;
        inner.state = ConnectionState::Disconnected;
        info!("NATS client disconnected");
    }
}

impl std::fmt::Debug for NatsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsClient").finish_non_exhaustive()
    }
}
