use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, InternalResult};

/// Top-level configuration shared by ports, services and discovery.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Settings injected into each network port at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Upper bound on a send round trip. `None` waits for the peer indefinitely.
    #[serde(default, with = "option_duration_ms")]
    pub request_timeout: Option<Duration>,

    /// How long a listener waits for the local side to produce its reply.
    #[serde(default, with = "option_duration_ms")]
    pub reply_timeout: Option<Duration>,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            request_timeout: None,
            reply_timeout: None,
            max_frame_size: default_max_frame_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Sleep between polls of an empty event queue.
    #[serde(default = "default_idle_interval", with = "duration_ms")]
    pub idle_interval: Duration,

    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            idle_interval: default_idle_interval(),
            name_prefix: default_name_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,

    /// Bound on the wait for a discovery reply. `None` waits indefinitely.
    #[serde(default, with = "option_duration_ms")]
    pub reply_timeout: Option<Duration>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            reply_timeout: None,
        }
    }
}

pub const SUPPORTED_SCHEMES: &[&str] = &["tcp"];

impl CoreConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        let config: Self = from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(s: &str) -> InternalResult<Self> {
        let config: Self = from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> InternalResult<()> {
        if !SUPPORTED_SCHEMES.contains(&self.transport.scheme.as_str()) {
            return Err(Error::Config(format!(
                "Unsupported transport scheme: {}",
                self.transport.scheme
            )));
        }
        if self.transport.max_frame_size == 0 {
            return Err(Error::Config(
                "max_frame_size must be greater than 0".to_string(),
            ));
        }
        if self.service.idle_interval.is_zero() {
            return Err(Error::Config(
                "idle_interval must be greater than 0".to_string(),
            ));
        }
        if self.discovery.poll_interval.is_zero() {
            return Err(Error::Config(
                "poll_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_scheme() -> String {
    "tcp".to_string()
}
fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}
fn default_idle_interval() -> Duration {
    Duration::from_millis(10)
}
fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}
fn default_name_prefix() -> String {
    "service".to_string()
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
