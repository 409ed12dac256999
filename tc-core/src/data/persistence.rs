//! JSON persistence for device records
//!
//! The file is a single JSON object keyed by device id:
//!
//! ```json
//! { "cam1": { "name": "Camera-cam1", "state": "offline",
//!             "zones": [ { "coords": [[0.5, 0.5]], "type": "point", "enabled": true,
//!                          "threshold": 50.0, "color": "#ff0000" } ],
//!             "processingSettings": { "overlay_mode": "both", ... } } }
//! ```
//!
//! Addresses are never written (they are rediscovered at runtime) and the
//! stored state is ignored on load: every record comes back `offline`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::paths;
use crate::data::types::{AlertZone, DeviceState, ProcessingSettings};
use crate::data::validation::validate_device_id;
use crate::error::{Result, ThermocamError};

/// One persisted device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDevice {
    pub name: String,
    #[serde(default = "offline")]
    pub state: DeviceState,
    #[serde(default)]
    pub zones: Vec<AlertZone>,
    #[serde(rename = "processingSettings", default)]
    pub processing_settings: ProcessingSettings,
}

fn offline() -> DeviceState {
    DeviceState::Offline
}

/// All persisted devices keyed by id
pub type DeviceRecords = BTreeMap<String, PersistedDevice>;

/// Load/save collaborator for the device registry
#[derive(Debug, Clone)]
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.config/thermocam/devices.json`
    pub fn default_location() -> Self {
        Self::new(paths::default_devices_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load records from disk
    ///
    /// A missing file is an empty store. Records with invalid ids are skipped.
    pub fn load(&self) -> Result<DeviceRecords> {
        if !self.path.exists() {
            debug!("No device file at {:?}, starting with an empty registry", self.path);
            return Ok(DeviceRecords::new());
        }

        let contents =
            fs::read_to_string(&self.path).map_err(|e| ThermocamError::read_file(&self.path, e))?;

        if contents.trim().is_empty() {
            return Ok(DeviceRecords::new());
        }

        let raw: DeviceRecords = serde_json::from_str(&contents)?;
        let mut records = DeviceRecords::new();
        for (id, mut record) in raw {
            if let Err(e) = validate_device_id(&id) {
                warn!("Skipping stored device: {}", e);
                continue;
            }
            record.state = DeviceState::Offline;
            records.insert(id, record);
        }

        info!("Loaded {} devices from {:?}", records.len(), self.path);
        Ok(records)
    }

    /// Save records to disk atomically (temp file, fsync, rename)
    pub fn save(&self, records: &DeviceRecords) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(records)?;

        let temp_path = self.path.with_extension("json.tmp");
        let write_err = |e| ThermocamError::write_file(&temp_path, e);

        let mut file = fs::File::create(&temp_path).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| ThermocamError::write_file(&self.path, e))?;

        debug!("Saved {} devices to {:?}", records.len(), self.path);
        Ok(())
    }
}
