//! Device registry and lifecycle state machine
//!
//! The registry exclusively owns every device record. State only changes
//! through the fixed transition table:
//!
//! | from      | to        | trigger        |
//! |-----------|-----------|----------------|
//! | Init      | Offline   | acknowledged   |
//! | Offline   | Available | connected      |
//! | Available | Active    | activated      |
//! | Active    | Error     | failure        |
//! | Error     | Offline   | reset          |
//!
//! Anything else is rejected, reported as a value, and leaves the state alone.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::data::{
    validate_address, validate_device_id, validate_device_name, validate_settings,
    validate_zones, AlertZone, Device, DeviceRecords, DeviceState, PersistedDevice,
    ProcessingSettings,
};
use crate::error::{Result, ThermocamError};
use crate::zones::ensure_global_zone;

/// Named edge of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Acknowledged,
    Connected,
    Activated,
    Failure,
    Reset,
}

/// The full transition table
pub const TRANSITIONS: [(DeviceState, DeviceState, Trigger); 5] = [
    (DeviceState::Init, DeviceState::Offline, Trigger::Acknowledged),
    (DeviceState::Offline, DeviceState::Available, Trigger::Connected),
    (DeviceState::Available, DeviceState::Active, Trigger::Activated),
    (DeviceState::Active, DeviceState::Error, Trigger::Failure),
    (DeviceState::Error, DeviceState::Offline, Trigger::Reset),
];

impl Trigger {
    /// Source and target state of this edge
    pub fn edge(self) -> (DeviceState, DeviceState) {
        match self {
            Trigger::Acknowledged => (DeviceState::Init, DeviceState::Offline),
            Trigger::Connected => (DeviceState::Offline, DeviceState::Available),
            Trigger::Activated => (DeviceState::Available, DeviceState::Active),
            Trigger::Failure => (DeviceState::Active, DeviceState::Error),
            Trigger::Reset => (DeviceState::Error, DeviceState::Offline),
        }
    }

    /// Trigger for a `(from, to)` pair, if the table has one
    pub fn between(from: DeviceState, to: DeviceState) -> Option<Trigger> {
        TRANSITIONS
            .iter()
            .find(|(f, t, _)| *f == from && *t == to)
            .map(|(_, _, trigger)| *trigger)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Acknowledged => "acknowledged",
            Trigger::Connected => "connected",
            Trigger::Activated => "activated",
            Trigger::Failure => "failure",
            Trigger::Reset => "reset",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status token published by a device on `<id>/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusToken {
    Active,
    Connected,
    Offline,
}

impl StatusToken {
    pub fn target(self) -> DeviceState {
        match self {
            StatusToken::Active => DeviceState::Active,
            StatusToken::Connected => DeviceState::Available,
            StatusToken::Offline => DeviceState::Offline,
        }
    }
}

impl FromStr for StatusToken {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "active" => Ok(StatusToken::Active),
            "connected" => Ok(StatusToken::Connected),
            "offline" => Ok(StatusToken::Offline),
            other => Err(format!("unknown status token '{}'", other)),
        }
    }
}

/// Result of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        from: DeviceState,
        to: DeviceState,
        trigger: Trigger,
    },
    /// Already in the requested state
    Unchanged(DeviceState),
    /// Not in the table; state kept
    Rejected { from: DeviceState, to: DeviceState },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, TransitionOutcome::Rejected { .. })
    }
}

/// Owner of all device records
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a device seen on the discovery topic
    ///
    /// Unknown ids are created `Available`; known ids get the new address and
    /// are reset to `Available`. Returns true for a new device.
    pub fn discover(&mut self, id: &str, address: &str) -> Result<bool> {
        validate_device_id(id)?;
        validate_address(address)?;

        match self.devices.get_mut(id) {
            Some(device) => {
                if device.address != address {
                    debug!("Device {} moved {} -> {}", id, device.address, address);
                }
                device.address = address.to_string();
                device.state = DeviceState::Available;
                Ok(false)
            }
            None => {
                info!("STATE: discovered new device {} at {}", id, address);
                self.devices
                    .insert(id.to_string(), Device::new(id, address, DeviceState::Available));
                Ok(true)
            }
        }
    }

    /// Apply a status token through the transition table
    ///
    /// Unknown tokens are ignored (`Ok(None)`).
    pub fn set_status(&mut self, id: &str, token: &str) -> Result<Option<TransitionOutcome>> {
        let token = match token.parse::<StatusToken>() {
            Ok(token) => token,
            Err(e) => {
                debug!("Ignoring status for {}: {}", id, e);
                return Ok(None);
            }
        };
        self.transition(id, token.target()).map(Some)
    }

    /// Request a move to `target`
    pub fn transition(&mut self, id: &str, target: DeviceState) -> Result<TransitionOutcome> {
        let device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| ThermocamError::UnknownDevice(id.to_string()))?;
        let from = device.state;

        if from == target {
            return Ok(TransitionOutcome::Unchanged(from));
        }

        match Trigger::between(from, target) {
            Some(trigger) => {
                device.state = target;
                info!("STATE: {} {} -> {} ({})", id, from, target, trigger);
                Ok(TransitionOutcome::Applied { from, to: target, trigger })
            }
            None => {
                warn!("STATE: rejected {} {} -> {}", id, from, target);
                Ok(TransitionOutcome::Rejected { from, to: target })
            }
        }
    }

    /// Fire a named trigger; rejected when the device is not in its source state
    pub fn apply(&mut self, id: &str, trigger: Trigger) -> Result<TransitionOutcome> {
        let (from, to) = trigger.edge();
        let current = self
            .get(id)
            .map(|d| d.state)
            .ok_or_else(|| ThermocamError::UnknownDevice(id.to_string()))?;
        if current != from {
            warn!("STATE: rejected {} on {} in state {}", trigger, id, current);
            return Ok(TransitionOutcome::Rejected { from: current, to });
        }
        self.transition(id, to)
    }

    /// Remove a device; refused while it is `Active`
    pub fn remove(&mut self, id: &str) -> Result<Device> {
        match self.devices.get(id) {
            None => Err(ThermocamError::UnknownDevice(id.to_string())),
            Some(d) if d.is_active() => Err(ThermocamError::DeviceActive(id.to_string())),
            Some(_) => {
                info!("Removed device {}", id);
                self.devices
                    .remove(id)
                    .ok_or_else(|| ThermocamError::UnknownDevice(id.to_string()))
            }
        }
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<()> {
        let name = validate_device_name(name)?;
        let device = self.get_mut(id)?;
        device.name = name;
        Ok(())
    }

    /// Replace a device's zones; validated, then the Global zone rule is applied
    pub fn set_zones(&mut self, id: &str, mut zones: Vec<AlertZone>) -> Result<&[AlertZone]> {
        validate_zones(&zones)?;
        ensure_global_zone(&mut zones);
        let device = self.get_mut(id)?;
        device.zones = zones;
        Ok(&device.zones)
    }

    pub fn set_settings(&mut self, id: &str, settings: ProcessingSettings) -> Result<()> {
        validate_settings(&settings)?;
        self.get_mut(id)?.settings = settings;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Device> {
        self.devices
            .get_mut(id)
            .ok_or_else(|| ThermocamError::UnknownDevice(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// All devices ordered by id
    pub fn all(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn available(&self) -> impl Iterator<Item = &Device> {
        self.in_state(DeviceState::Available)
    }

    pub fn active(&self) -> impl Iterator<Item = &Device> {
        self.in_state(DeviceState::Active)
    }

    fn in_state(&self, state: DeviceState) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(move |d| d.state == state)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Merge persisted records; devices come back `Offline` without an address
    ///
    /// Ids already present are left untouched. Invalid zone lists or
    /// settings fall back to defaults.
    pub fn load_records(&mut self, records: DeviceRecords) -> usize {
        let mut loaded = 0;
        for (id, record) in records {
            if self.devices.contains_key(&id) {
                continue;
            }
            let mut device = Device::new(&id, "", DeviceState::Offline);
            if let Ok(name) = validate_device_name(&record.name) {
                device.name = name;
            }
            match validate_zones(&record.zones) {
                Ok(()) => {
                    let mut zones = record.zones;
                    ensure_global_zone(&mut zones);
                    device.zones = zones;
                }
                Err(e) => warn!("Dropping stored zones of {}: {}", id, e),
            }
            match validate_settings(&record.processing_settings) {
                Ok(()) => device.settings = record.processing_settings,
                Err(e) => warn!("Resetting stored settings of {}: {}", id, e),
            }
            self.devices.insert(id, device);
            loaded += 1;
        }
        loaded
    }

    /// Persistable view of every device
    pub fn to_records(&self) -> DeviceRecords {
        self.devices
            .iter()
            .map(|(id, d)| {
                (
                    id.clone(),
                    PersistedDevice {
                        name: d.name.clone(),
                        state: d.state,
                        zones: d.zones.clone(),
                        processing_settings: d.settings,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{NormPoint, ZoneKind};

    fn registry_with(state: DeviceState) -> DeviceRegistry {
        let mut reg = DeviceRegistry::new();
        reg.discover("cam1", "10.0.0.5").unwrap();
        reg.devices.get_mut("cam1").unwrap().state = state;
        reg
    }

    #[test]
    fn test_transition_table_exhaustive() {
        for from in DeviceState::ALL {
            for to in DeviceState::ALL {
                let mut reg = registry_with(from);
                let outcome = reg.transition("cam1", to).unwrap();
                let state = reg.get("cam1").unwrap().state;
                match Trigger::between(from, to) {
                    Some(trigger) => {
                        assert_eq!(outcome, TransitionOutcome::Applied { from, to, trigger });
                        assert_eq!(state, to);
                    }
                    None => {
                        assert!(!outcome.is_applied(), "{} -> {}", from, to);
                        assert_eq!(state, from);
                    }
                }
            }
        }
    }

    #[test]
    fn test_trigger_edges_match_table() {
        for (from, to, trigger) in TRANSITIONS {
            assert_eq!(trigger.edge(), (from, to));
        }
    }

    #[test]
    fn test_apply_trigger_requires_source_state() {
        for (from, to, trigger) in TRANSITIONS {
            let mut reg = registry_with(from);
            assert!(reg.apply("cam1", trigger).unwrap().is_applied());
            assert_eq!(reg.get("cam1").unwrap().state, to);

            for other in DeviceState::ALL.into_iter().filter(|s| *s != from) {
                let mut reg = registry_with(other);
                assert!(reg.apply("cam1", trigger).unwrap().is_rejected());
                assert_eq!(reg.get("cam1").unwrap().state, other);
            }
        }
    }

    #[test]
    fn test_discover_new_and_known() {
        let mut reg = DeviceRegistry::new();
        assert!(reg.discover("cam1", "10.0.0.5").unwrap());
        let d = reg.get("cam1").unwrap();
        assert_eq!(d.state, DeviceState::Available);
        assert_eq!(d.address, "10.0.0.5");
        assert_eq!(d.name, "Camera-cam1");

        reg.devices.get_mut("cam1").unwrap().state = DeviceState::Offline;
        assert!(!reg.discover("cam1", "10.0.0.9").unwrap());
        let d = reg.get("cam1").unwrap();
        assert_eq!(d.state, DeviceState::Available);
        assert_eq!(d.address, "10.0.0.9");
    }

    #[test]
    fn test_discover_rejects_bad_ids() {
        let mut reg = DeviceRegistry::new();
        assert!(reg.discover("cam/1", "10.0.0.5").is_err());
        assert!(reg.discover("cam1", "").is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_set_status_tokens() {
        let mut reg = registry_with(DeviceState::Available);
        let outcome = reg.set_status("cam1", "active").unwrap().unwrap();
        assert!(outcome.is_applied());
        assert_eq!(reg.get("cam1").unwrap().state, DeviceState::Active);

        assert_eq!(reg.set_status("cam1", "rebooting").unwrap(), None);
        assert_eq!(reg.get("cam1").unwrap().state, DeviceState::Active);

        // Active -> Available is not an edge
        let outcome = reg.set_status("cam1", "connected").unwrap().unwrap();
        assert!(outcome.is_rejected());
        assert_eq!(reg.get("cam1").unwrap().state, DeviceState::Active);
    }

    #[test]
    fn test_unknown_device() {
        let mut reg = DeviceRegistry::new();
        assert!(matches!(
            reg.set_status("ghost", "active"),
            Err(ThermocamError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_remove_active_refused() {
        let mut reg = registry_with(DeviceState::Active);
        assert!(matches!(reg.remove("cam1"), Err(ThermocamError::DeviceActive(_))));
        assert!(reg.contains("cam1"));

        let mut reg = registry_with(DeviceState::Available);
        assert_eq!(reg.remove("cam1").unwrap().id, "cam1");
        assert!(!reg.contains("cam1"));
    }

    #[test]
    fn test_set_zones_keeps_global() {
        let mut reg = registry_with(DeviceState::Available);
        let zones = reg
            .set_zones("cam1", vec![AlertZone::point(NormPoint::new(0.2, 0.3))])
            .unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones.iter().filter(|z| z.kind == ZoneKind::Global).count(), 1);

        let bad = vec![AlertZone::point(NormPoint::new(2.0, 0.3))];
        assert!(reg.set_zones("cam1", bad).is_err());
        assert_eq!(reg.get("cam1").unwrap().zones.len(), 2);
    }

    #[test]
    fn test_filters() {
        let mut reg = DeviceRegistry::new();
        reg.discover("a", "1.1.1.1").unwrap();
        reg.discover("b", "1.1.1.2").unwrap();
        reg.set_status("b", "active").unwrap();
        assert_eq!(reg.available().map(|d| d.id.as_str()).collect::<Vec<_>>(), ["a"]);
        assert_eq!(reg.active().map(|d| d.id.as_str()).collect::<Vec<_>>(), ["b"]);
    }

    #[test]
    fn test_records_round_trip_forces_offline() {
        let mut reg = registry_with(DeviceState::Active);
        reg.rename("cam1", "Boiler room").unwrap();
        let records = reg.to_records();
        assert_eq!(records["cam1"].state, DeviceState::Active);

        let mut fresh = DeviceRegistry::new();
        assert_eq!(fresh.load_records(records), 1);
        let d = fresh.get("cam1").unwrap();
        assert_eq!(d.state, DeviceState::Offline);
        assert_eq!(d.address, "");
        assert_eq!(d.name, "Boiler room");
        assert!(d.zones[0].is_global());
    }
}
