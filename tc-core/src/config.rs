//! Daemon configuration
//!
//! Stored as JSON in ~/.config/thermocam/config.json. Every field has a
//! serde default, so a missing file or a partial file is valid. Command line
//! flags override file values in the daemon.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::{broker, discovery, fusion, output, paths, stream};
use crate::error::{Result, ThermocamError};

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// MQTT broker connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_broker_host() -> String {
    broker::DEFAULT_HOST.to_string()
}

fn default_broker_port() -> u16 {
    broker::DEFAULT_PORT
}

fn default_client_id() -> String {
    broker::DEFAULT_CLIENT_ID.to_string()
}

fn default_keep_alive() -> u64 {
    broker::DEFAULT_KEEP_ALIVE_SECS
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

/// Video stream and worker supervision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_mjpeg_port")]
    pub mjpeg_port: u16,
    /// Accepted frames per second per worker
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Bounded frame queue capacity
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period between `stop` and a forced kill
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_mjpeg_port() -> u16 {
    stream::DEFAULT_MJPEG_PORT
}

fn default_frame_rate() -> u32 {
    stream::DEFAULT_FRAME_RATE
}

fn default_queue_depth() -> usize {
    stream::DEFAULT_QUEUE_DEPTH
}

fn default_poll_interval_ms() -> u64 {
    stream::DEFAULT_POLL_INTERVAL_MS
}

fn default_stop_grace_ms() -> u64 {
    stream::DEFAULT_STOP_GRACE_MS
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mjpeg_port: default_mjpeg_port(),
            frame_rate: default_frame_rate(),
            queue_depth: default_queue_depth(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Minimum spacing between accepted frames
    pub fn min_frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.frame_rate.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_eval_width")]
    pub eval_width: u32,
    #[serde(default = "default_eval_height")]
    pub eval_height: u32,
}

fn default_eval_width() -> u32 {
    fusion::DEFAULT_EVAL_WIDTH
}

fn default_eval_height() -> u32 {
    fusion::DEFAULT_EVAL_HEIGHT
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            eval_width: default_eval_width(),
            eval_height: default_eval_height(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Device records file; defaults to the user config dir
    #[serde(default)]
    pub devices_file: Option<PathBuf>,
}

impl StorageConfig {
    pub fn devices_path(&self) -> PathBuf {
        self.devices_file
            .clone()
            .unwrap_or_else(paths::default_devices_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(paths::SOCKET_PATH)
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

/// mDNS advertisement of the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    #[serde(default = "default_host_name")]
    pub host_name: String,
    /// Address to advertise; auto-detected when unset
    #[serde(default)]
    pub advertised_ip: Option<String>,
    /// Advertised port; the broker port when unset
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_true() -> bool {
    true
}

fn default_instance_name() -> String {
    discovery::DEFAULT_INSTANCE_NAME.to_string()
}

fn default_host_name() -> String {
    discovery::DEFAULT_HOST_NAME.to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_name: default_instance_name(),
            host_name: default_host_name(),
            advertised_ip: None,
            port: None,
        }
    }
}

/// Snapshot sink for composed overlays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for `<id>.jpg` snapshots; disabled when unset
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
}

fn default_snapshot_interval_ms() -> u64 {
    output::DEFAULT_SNAPSHOT_INTERVAL_MS
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: None,
            snapshot_interval_ms: default_snapshot_interval_ms(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, or from the default location when `None`
    ///
    /// A missing file yields the defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(paths::default_config_path);

        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|e| ThermocamError::read_file(&path, e))?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| ThermocamError::write_file(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().is_empty() {
            return Err(ThermocamError::invalid_config("broker.host", "must not be empty"));
        }
        if self.broker.port == 0 {
            return Err(ThermocamError::invalid_config("broker.port", "must not be 0"));
        }
        if self.broker.client_id.trim().is_empty() {
            return Err(ThermocamError::invalid_config("broker.client_id", "must not be empty"));
        }
        if self.stream.frame_rate == 0 || self.stream.frame_rate > 120 {
            return Err(ThermocamError::invalid_config("stream.frame_rate", "must be within 1-120"));
        }
        if self.stream.queue_depth == 0 {
            return Err(ThermocamError::invalid_config("stream.queue_depth", "must be at least 1"));
        }
        if self.stream.poll_interval_ms == 0 {
            return Err(ThermocamError::invalid_config(
                "stream.poll_interval_ms",
                "must be at least 1",
            ));
        }
        if self.fusion.eval_width == 0 || self.fusion.eval_height == 0 {
            return Err(ThermocamError::invalid_config("fusion", "evaluation size must be non-zero"));
        }
        Ok(())
    }
}
