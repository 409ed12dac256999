//! Constants and configuration defaults for Thermocam
//!
//! Centralizes magic numbers, paths, and configuration defaults.
//! Values that operators may want to tune also appear in `config::DaemonConfig`,
//! which takes its defaults from here.

use std::time::Duration;

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// Application directory name under the user config dir
    pub const APP_DIR: &str = "thermocam";

    /// Daemon configuration file
    pub const CONFIG_FILE: &str = "config.json";

    /// Persisted device records
    pub const DEVICES_FILE: &str = "devices.json";

    /// Default control socket path
    pub const SOCKET_PATH: &str = "/tmp/thermocam.sock";

    /// User configuration directory (`$XDG_CONFIG_HOME/thermocam` or equivalent)
    pub fn user_config_dir() -> Option<PathBuf> {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join(APP_DIR));
        }
        dirs::config_dir().map(|p| p.join(APP_DIR))
    }

    /// Default location of the daemon config file
    pub fn default_config_path() -> PathBuf {
        user_config_dir()
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
            .join(CONFIG_FILE)
    }

    /// Default location of the device store
    pub fn default_devices_path() -> PathBuf {
        user_config_dir()
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
            .join(DEVICES_FILE)
    }
}

/// AMG8833 thermal sensor payload layout
pub mod thermal {
    /// Sensor grid is GRID_SIZE x GRID_SIZE
    pub const GRID_SIZE: usize = 8;

    /// Number of readings per payload
    pub const CELL_COUNT: usize = GRID_SIZE * GRID_SIZE;

    /// Payload length in bytes (64 little-endian f32)
    pub const PAYLOAD_LEN: usize = CELL_COUNT * 4;

    /// Weight kept from the previous smoothed matrix
    pub const SMOOTHING_RETAIN: f32 = 0.8;

    /// Weight given to a new raw matrix
    pub const SMOOTHING_GAIN: f32 = 0.2;
}

/// Video stream and worker defaults
pub mod stream {
    use super::Duration;

    /// Port of the device's MJPEG HTTP endpoint
    pub const DEFAULT_MJPEG_PORT: u16 = 80;

    /// Path of the MJPEG stream on the device
    pub const MJPEG_PATH: &str = "/mjpeg/1";

    /// Target accepted frames per second per worker
    pub const DEFAULT_FRAME_RATE: u32 = 25;

    /// Bounded frame queue depth (drop-oldest on overflow)
    pub const DEFAULT_QUEUE_DEPTH: usize = 5;

    /// Supervisor poll tick, roughly twice the target frame rate
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

    /// How long a worker gets to exit after `stop` before it is killed
    pub const DEFAULT_STOP_GRACE_MS: u64 = 500;

    /// Sleep between control checks while a worker is paused
    pub const PAUSED_IDLE: Duration = Duration::from_millis(10);

    /// Connect timeout when opening the MJPEG source
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// A single read from the MJPEG stream taking longer than this fails the worker
    pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Largest single JPEG we are willing to buffer from a stream
    pub const MAX_JPEG_SIZE: usize = 8 * 1024 * 1024;

    /// Build the video source URL for a device
    pub fn video_source_url(address: &str, port: u16) -> String {
        format!("http://{}:{}{}", address, port, MJPEG_PATH)
    }
}

/// Fusion engine constants
pub mod fusion {
    /// Added to the running range to avoid division by zero
    pub const NORMALIZE_EPSILON: f32 = 1e-5;

    /// Slice of the resampler's 0.0..=1.0 float range the heatmap is mapped
    /// into; the margins absorb cubic overshoot
    pub const RESAMPLE_BAND: (f32, f32) = (0.25, 0.75);

    /// Evaluation resolution used before the first frame of a device arrives
    pub const DEFAULT_EVAL_WIDTH: u32 = 640;
    pub const DEFAULT_EVAL_HEIGHT: u32 = 480;
}

/// Alert zone defaults
pub mod zones {
    /// Area zones are scanned every AREA_SCAN_STRIDE pixels on both axes
    pub const AREA_SCAN_STRIDE: usize = 2;

    /// Default alarm threshold in Celsius
    pub const DEFAULT_THRESHOLD: f32 = 50.0;

    /// Default zone color
    pub const DEFAULT_COLOR: &str = "#ff0000";

    /// Upper bound on zones per device
    pub const MAX_ZONES: usize = 64;

    /// Upper bound on vertices per area zone
    pub const MAX_VERTICES: usize = 256;
}

/// Device defaults
pub mod device {
    /// Prefix for auto-generated device names
    pub const NAME_PREFIX: &str = "Camera-";

    /// Maximum device id length (ids end up in topic names)
    pub const MAX_ID_LEN: usize = 64;

    /// Maximum user-visible name length
    pub const MAX_NAME_LEN: usize = 128;
}

/// Processing settings defaults
pub mod processing {
    pub const DEFAULT_THERMO_ALPHA: u8 = 30;
    pub const DEFAULT_FILTER_INTENSITY: u8 = 30;
    pub const MAX_PERCENT: u8 = 100;
}

/// Message broker defaults
pub mod broker {
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 1883;
    pub const DEFAULT_CLIENT_ID: &str = "server";
    pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
}

/// mDNS advertisement defaults
pub mod discovery {
    pub const SERVICE_TYPE: &str = "_http._tcp.local.";
    pub const DEFAULT_INSTANCE_NAME: &str = "ThermocamServer";
    pub const DEFAULT_HOST_NAME: &str = "thermocam-server.local.";
}

/// Snapshot output defaults
pub mod output {
    /// Minimum time between two snapshots of the same device
    pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 1000;
}
