//! Input validation for Thermocam
//!
//! Device ids arrive from the network and end up in topic names and file
//! keys, zones and settings arrive from control clients. Everything is
//! checked here before it reaches the registry or the fusion engine.

use regex::Regex;
use std::sync::OnceLock;

use crate::constants::{device as device_const, processing, zones as zone_const};
use crate::data::types::{AlertZone, ProcessingSettings, ZoneKind};
use crate::error::{Result, ThermocamError};

fn pattern_matches(pattern: &'static OnceLock<Option<Regex>>, source: &str, value: &str) -> bool {
    pattern
        .get_or_init(|| Regex::new(source).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

// Topic wildcards ('+', '#') and separators ('/') are excluded
fn is_valid_id_syntax(id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    pattern_matches(&PATTERN, r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$", id)
}

fn is_hex_color(color: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    pattern_matches(&PATTERN, r"^#[0-9a-fA-F]{6}$", color)
}

/// Validates a device id received from discovery or a client
pub fn validate_device_id(id: &str) -> Result<()> {
    let invalid = |reason: &str| ThermocamError::InvalidDeviceId {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if id.is_empty() {
        return Err(invalid("empty"));
    }
    if id.len() > device_const::MAX_ID_LEN {
        return Err(invalid("too long"));
    }
    if !is_valid_id_syntax(id) {
        return Err(invalid("only letters, digits, '.', '_' and '-' are allowed"));
    }
    Ok(())
}

/// Validates a device address from a discovery message
pub fn validate_address(address: &str) -> Result<()> {
    if address.is_empty() || address.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(ThermocamError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// Validates and trims a user-visible device name
pub fn validate_device_name(name: &str) -> Result<String> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ThermocamError::InvalidDeviceName("empty".into()));
    }

    if trimmed.chars().count() > device_const::MAX_NAME_LEN {
        return Err(ThermocamError::InvalidDeviceName(format!(
            "longer than {} characters",
            device_const::MAX_NAME_LEN
        )));
    }

    if trimmed.chars().any(char::is_control) {
        return Err(ThermocamError::InvalidDeviceName("contains control characters".into()));
    }

    Ok(trimmed.to_string())
}

/// Validates a single zone's geometry and parameters
pub fn validate_zone(zone: &AlertZone) -> Result<()> {
    if let Some(p) = zone.coords.iter().find(|p| !p.is_in_unit_square()) {
        return Err(ThermocamError::InvalidZone(format!(
            "coordinate ({}, {}) is outside the unit square",
            p.x, p.y
        )));
    }

    match zone.kind {
        ZoneKind::Point if zone.coords.len() != 1 => {
            return Err(ThermocamError::InvalidZone(format!(
                "point zone needs exactly one coordinate, got {}",
                zone.coords.len()
            )));
        }
        ZoneKind::Area if zone.coords.len() < 3 => {
            return Err(ThermocamError::InvalidZone(format!(
                "area zone needs at least 3 vertices, got {}",
                zone.coords.len()
            )));
        }
        _ => {}
    }

    if zone.coords.len() > zone_const::MAX_VERTICES {
        return Err(ThermocamError::InvalidZone(format!(
            "zone exceeds maximum of {} vertices",
            zone_const::MAX_VERTICES
        )));
    }

    if !zone.threshold.is_finite() {
        return Err(ThermocamError::InvalidZone("threshold must be finite".into()));
    }

    if !is_hex_color(&zone.color) {
        return Err(ThermocamError::InvalidZone(format!(
            "color {:?} is not of the form #rrggbb",
            zone.color
        )));
    }

    Ok(())
}

/// Validates a full zone list
pub fn validate_zones(zones: &[AlertZone]) -> Result<()> {
    if zones.len() > zone_const::MAX_ZONES {
        return Err(ThermocamError::InvalidZone(format!(
            "device exceeds maximum of {} zones",
            zone_const::MAX_ZONES
        )));
    }
    zones.iter().try_for_each(validate_zone)
}

/// Validates processing settings ranges
pub fn validate_settings(settings: &ProcessingSettings) -> Result<()> {
    if settings.thermo_alpha > processing::MAX_PERCENT {
        return Err(ThermocamError::invalid_settings(
            "thermo_alpha",
            format!("{} is outside 0-100", settings.thermo_alpha),
        ));
    }
    if settings.filter_intensity > processing::MAX_PERCENT {
        return Err(ThermocamError::invalid_settings(
            "filter_intensity",
            format!("{} is outside 0-100", settings.filter_intensity),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::NormPoint;

    #[test]
    fn test_validate_device_id() {
        assert!(validate_device_id("cam1").is_ok());
        assert!(validate_device_id("esp32-cam_01.a").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("cam/1").is_err());
        assert!(validate_device_id("cam+").is_err());
        assert!(validate_device_id("#").is_err());
        assert!(validate_device_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("10.0.0.5").is_ok());
        assert!(validate_address("").is_err());
        assert!(validate_address("10.0.0.5 x").is_err());
    }

    #[test]
    fn test_validate_device_name() {
        assert_eq!(validate_device_name("  Lab cam ").unwrap(), "Lab cam");
        assert!(validate_device_name("   ").is_err());
        assert!(validate_device_name("bad\nname").is_err());
    }

    #[test]
    fn test_validate_zone_shapes() {
        assert!(validate_zone(&AlertZone::point(NormPoint::new(0.5, 0.5))).is_ok());
        assert!(validate_zone(&AlertZone::global()).is_ok());

        let mut point = AlertZone::point(NormPoint::new(0.5, 0.5));
        point.coords.push(NormPoint::new(0.1, 0.1));
        assert!(validate_zone(&point).is_err());

        let line = AlertZone::area(vec![NormPoint::new(0.0, 0.0), NormPoint::new(1.0, 1.0)]);
        assert!(validate_zone(&line).is_err());

        let outside = AlertZone::point(NormPoint::new(1.5, 0.5));
        assert!(validate_zone(&outside).is_err());
    }

    #[test]
    fn test_validate_zone_color_and_threshold() {
        let zone = AlertZone::point(NormPoint::new(0.5, 0.5)).with_color("red");
        assert!(validate_zone(&zone).is_err());
        let zone = AlertZone::point(NormPoint::new(0.5, 0.5)).with_threshold(f32::NAN);
        assert!(validate_zone(&zone).is_err());
    }

    #[test]
    fn test_validate_settings() {
        assert!(validate_settings(&ProcessingSettings::default()).is_ok());
        let s = ProcessingSettings { thermo_alpha: 101, ..Default::default() };
        assert!(matches!(
            validate_settings(&s),
            Err(ThermocamError::InvalidSettings { .. })
        ));
    }
}
