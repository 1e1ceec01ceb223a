use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(
        default = "default_lease_duration",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub lease_duration: Duration,
    #[serde(
        default = "default_cleanup_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub cleanup_interval: Duration,
    #[serde(
        default = "default_store_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub store_timeout: Duration,
    #[serde(default)]
    pub backend: BackendMode,
    pub nats: Option<NatsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lease_duration: default_lease_duration(),
            cleanup_interval: default_cleanup_interval(),
            store_timeout: default_store_timeout(),
            backend: BackendMode::default(),
            nats: None,
        }
    }
}

/// which store backs the leases
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// in-process store, single instance only
    #[default]
    Memory,
    /// NATS JetStream key-value bucket, shared by every instance
    Nats,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NatsConfig {
    pub servers: MaybeList<String>,
    #[serde(default = "default_leases_bucket")]
    pub leases_bucket: String,
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    #[serde(default)]
    pub security_mode: NatsSecurityMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub nkey_seed_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub creds_file_path: Option<PathBuf>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration"
    )]
    pub connect_timeout: Option<Duration>,
    #[serde(default = "default_connect_retry_max")]
    pub connect_retry_max: u32,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration"
    )]
    pub request_timeout: Option<Duration>,
}

/// how the NATS connection authenticates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NatsSecurityMode {
    #[default]
    None,
    UserPassword,
    Token,
    Nkey,
    Tls,
    CredsFile,
}

pub const fn default_lease_duration() -> Duration {
    Duration::from_secs(600)
}

pub const fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

pub const fn default_store_timeout() -> Duration {
    Duration::from_secs(2)
}

pub fn default_leases_bucket() -> String {
    "booking_locks".to_owned()
}

pub const fn default_replicas() -> usize {
    1
}

pub const fn default_connect_retry_max() -> u32 {
    5
}

/// Parse a duration string with optional time units
/// Accepts: "600", "600s", "10m", "1h", "500ms"
/// If no unit is specified, assumes seconds
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration string");
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    // split units
    let (num, unit) = s.split_at(end);
    let num = num.parse::<u64>().context("invalid number")?;

    let millis_per_unit = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => anyhow::bail!(
            "unknown time unit '{}', only 'h', 'm', 's' or 'ms' are supported",
            other
        ),
    };

    num.checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .context("duration value overflow")
}

fn format_duration(d: &Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Seconds(u64),
    String(String),
}

impl WireDuration {
    fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
        let d = match self {
            WireDuration::Seconds(val) => Duration::from_secs(val),
            WireDuration::String(s) => parse_duration(&s).map_err(E::custom)?,
        };
        if d.is_zero() {
            return Err(E::custom("duration cannot be zero"));
        }
        Ok(d)
    }
}

fn deserialize_duration<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    WireDuration::deserialize(de)?.into_duration()
}

fn deserialize_optional_duration<'de, D>(de: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<WireDuration>::deserialize(de)?
        .map(WireDuration::into_duration)
        .transpose()
}

fn serialize_duration<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&format_duration(d))
}

fn serialize_optional_duration<S: Serializer>(
    d: &Option<Duration>,
    ser: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => ser.serialize_some(&format_duration(d)),
        None => ser.serialize_none(),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum MaybeList<T> {
    Val(T),
    List(Vec<T>),
}

impl<T> MaybeList<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            MaybeList::Val(v) => vec![v],
            MaybeList::List(list) => list,
        }
    }
}
