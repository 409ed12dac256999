//! Renderer-side sink for manager events
//!
//! Overlays are written as `<id>.jpg` and zone readings as `<id>.json` in the
//! snapshot directory, rate limited per device. Without a directory the sink
//! only logs.

use image::RgbImage;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tc_core::config::OutputConfig;
use tc_core::{Result, TemperatureUpdate, ThermocamError};

use crate::manager::ManagerEvent;

/// Write `bytes` to `path` through a temp file and rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);
    let write_err = |e| ThermocamError::write_file(&temp_path, e);
    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    drop(file);
    fs::rename(&temp_path, path).map_err(|e| ThermocamError::write_file(path, e))
}

fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut out = std::io::Cursor::new(Vec::new());
    frame
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .map_err(|e| ThermocamError::Snapshot(format!("JPEG encode failed: {}", e)))?;
    Ok(out.into_inner())
}

pub struct SnapshotSink {
    dir: PathBuf,
    interval: Duration,
    last_written: HashMap<String, Instant>,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            interval,
            last_written: HashMap::new(),
        })
    }

    pub fn from_config(config: &OutputConfig) -> Result<Option<Self>> {
        config
            .snapshot_dir
            .as_ref()
            .map(|dir| Self::new(dir, Duration::from_millis(config.snapshot_interval_ms)))
            .transpose()
    }

    pub fn snapshot_path(&self, device_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jpg", device_id))
    }

    pub fn readings_path(&self, device_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", device_id))
    }

    fn due(&mut self, device_id: &str, now: Instant) -> bool {
        match self.last_written.get(device_id) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_written.insert(device_id.to_string(), now);
                true
            }
        }
    }

    /// Write the overlay if the device's interval has elapsed
    ///
    /// Returns whether a file was written.
    pub async fn write_overlay(&mut self, device_id: &str, frame: Arc<RgbImage>) -> Result<bool> {
        if !self.due(device_id, Instant::now()) {
            return Ok(false);
        }
        let path = self.snapshot_path(device_id);
        tokio::task::spawn_blocking(move || {
            let bytes = encode_jpeg(&frame)?;
            write_atomic(&path, &bytes)
        })
        .await
        .map_err(|e| ThermocamError::Snapshot(format!("task failed: {}", e)))??;
        Ok(true)
    }

    pub fn write_readings(&self, update: &TemperatureUpdate) -> Result<()> {
        let json = serde_json::to_vec_pretty(&update.readings)?;
        write_atomic(&self.readings_path(&update.device_id), &json)
    }

    /// Reset the rate limit of a stopped device
    pub fn forget(&mut self, device_id: &str) {
        self.last_written.remove(device_id);
    }
}

/// Consume manager events until the channel closes
pub async fn run_sink(mut events: mpsc::UnboundedReceiver<ManagerEvent>, mut sink: Option<SnapshotSink>) {
    while let Some(event) = events.recv().await {
        match event {
            ManagerEvent::Overlay { device_id, frame } => {
                if let Some(sink) = sink.as_mut() {
                    if let Err(e) = sink.write_overlay(&device_id, frame).await {
                        warn!("Snapshot for {} failed: {}", device_id, e);
                    }
                }
            }
            ManagerEvent::Temperatures(update) => {
                for r in update.readings.iter().filter(|r| r.alarm) {
                    info!(
                        "ALARM: {} zone {} at {:.1}°C (threshold {:.1}°C)",
                        update.device_id, r.index, r.temperature, r.threshold
                    );
                }
                if let Some(sink) = sink.as_ref() {
                    if let Err(e) = sink.write_readings(&update) {
                        warn!("Readings for {} not written: {}", update.device_id, e);
                    }
                }
            }
            ManagerEvent::StreamStarted(id) => info!("STREAM: {} started", id),
            ManagerEvent::StreamPaused(id) => debug!("STREAM: {} paused", id),
            ManagerEvent::StreamResumed(id) => debug!("STREAM: {} resumed", id),
            ManagerEvent::StreamStopped(id) => {
                info!("STREAM: {} stopped", id);
                if let Some(sink) = sink.as_mut() {
                    sink.forget(&id);
                }
            }
            ManagerEvent::StreamFailed { device_id, message } => {
                warn!("STREAM: {} failed: {}", device_id, message)
            }
            ManagerEvent::TransitionRejected { device_id, from, to } => {
                warn!("STATE: {} rejected {} -> {}", device_id, from, to)
            }
        }
    }
    debug!("Event sink closed");
}
