use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Delivery settings; required for `collect`
    #[serde(default)]
    pub collector: Option<CollectorConfig>,

    #[serde(default)]
    pub sensors: SensorsConfig,

    pub storage: StorageConfig,

    /// Required for `reduce`
    #[serde(default)]
    pub reducer: Option<ReducerConfig>,

    /// Required for `receive` unless `--listen` is given
    #[serde(default)]
    pub receiver: Option<ReceiverConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// URL each batch document is POSTed to
    pub endpoint: String,

    /// Defaults to the hostname
    #[serde(default)]
    pub collector_id: Option<String>,

    /// Per-attempt network timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Immediate retries per batch per cycle, after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff between immediate retries; doubles per retry
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,

    /// How long to wait for another collector to release the outbox
    #[serde(default = "default_lock_wait", with = "humantime_serde")]
    pub lock_wait: Duration,

    /// How far the archive's clock may lag the sensor host's clock; widens
    /// the window searched for already-archived readings
    #[serde(default = "default_max_clock_skew", with = "humantime_serde")]
    pub max_clock_skew: Duration,

    /// Schedule of the external trigger (cron); only used to judge backlog age
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_lock_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_max_clock_skew() -> Duration {
    Duration::from_secs(600)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorsConfig {
    /// Directory holding one subdirectory per present device
    #[serde(default = "default_sensor_path")]
    pub path: PathBuf,

    /// File read inside each device directory
    #[serde(default = "default_value_file")]
    pub value_file: String,

    /// Device directory names that count as hardware addresses
    #[serde(default = "default_address_pattern")]
    pub address_pattern: String,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            path: default_sensor_path(),
            value_file: default_value_file(),
            address_pattern: default_address_pattern(),
        }
    }
}

fn default_sensor_path() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}

fn default_value_file() -> String {
    "w1_slave".to_string()
}

fn default_address_pattern() -> String {
    r"^[0-9a-fA-F]{2}-[0-9a-fA-F]+$".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub outbox: PathBuf,
    pub archive: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// Address to stream-name mapping document
    pub metadata: PathBuf,

    /// Directory receiving summary.json and per-stream plot files
    pub output: PathBuf,

    #[serde(default)]
    pub period: Period,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Day,
    Month,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub listen: SocketAddr,

    /// Where received batches are archived; defaults to `storage.archive`.
    /// Must differ from `storage.archive` when this host also collects.
    #[serde(default)]
    pub archive: Option<PathBuf>,
}

impl Config {
    /// Archive directory the receiver writes to
    pub fn receiver_archive(&self) -> Option<&PathBuf> {
        self.receiver
            .as_ref()
            .map(|r| r.archive.as_ref().unwrap_or(&self.storage.archive))
    }
}
