/*
 * This file is part of Thermocam.
 *
 * Copyright (C) 2025 Thermocam contributors
 *
 * Thermocam is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Thermocam is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Thermocam. If not, see <https://www.gnu.org/licenses/>.
 */

//! Display Formatting Helpers
//!
//! Plain-text rendering of devices and zone readings for the CLI.

use std::fmt::Write;

use tc_core::{AlertZone, ZoneKind, ZoneReading};
use tc_protocol::DeviceInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

/// Convert Celsius to Fahrenheit
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Format temperature with one decimal place
pub fn format_temp(temp_celsius: f32, unit: TempUnit) -> String {
    match unit {
        TempUnit::Celsius => format!("{:.1}°C", temp_celsius),
        TempUnit::Fahrenheit => format!("{:.1}°F", celsius_to_fahrenheit(temp_celsius)),
    }
}

fn kind_name(kind: ZoneKind) -> &'static str {
    match kind {
        ZoneKind::Point => "point",
        ZoneKind::Area => "area",
        ZoneKind::Global => "global",
    }
}

fn zone_label(zone: &AlertZone) -> String {
    let kind = kind_name(zone.kind);
    match zone.coords.as_slice() {
        [p] => format!("{} ({:.2}, {:.2})", kind, p.x, p.y),
        [] => kind.to_string(),
        points => format!("{} [{} points]", kind, points.len()),
    }
}

/// One line per device
pub fn device_table(devices: &[DeviceInfo]) -> String {
    if devices.is_empty() {
        return "No devices".to_string();
    }
    let id_width = devices.iter().map(|d| d.id.len()).max().unwrap_or(2).max(2);
    let name_width = devices.iter().map(|d| d.name.chars().count()).max().unwrap_or(4).max(4);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<id_width$}  {:<name_width$}  {:<9}  {:<15}  STREAM",
        "ID", "NAME", "STATE", "ADDRESS"
    );
    for d in devices {
        let address = if d.address.is_empty() { "-" } else { d.address.as_str() };
        let _ = writeln!(
            out,
            "{:<id_width$}  {:<name_width$}  {:<9}  {:<15}  {}",
            d.id,
            d.name,
            d.state.as_str(),
            address,
            if d.streaming { "yes" } else { "no" }
        );
    }
    out.truncate(out.trim_end().len());
    out
}

/// Device details including zones and processing settings
pub fn device_details(d: &DeviceInfo, unit: TempUnit) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", d.name, d.id);
    let _ = writeln!(out, "  state:     {}", d.state);
    let _ = writeln!(
        out,
        "  address:   {}",
        if d.address.is_empty() { "-" } else { d.address.as_str() }
    );
    let _ = writeln!(out, "  streaming: {}", if d.streaming { "yes" } else { "no" });
    let _ = writeln!(
        out,
        "  overlay:   {:?}, alpha {}%, filter {:?} ({}), colormap {:?}",
        d.settings.overlay_mode,
        d.settings.thermo_alpha,
        d.settings.video_filter,
        d.settings.filter_intensity,
        d.settings.heatmap_colormap
    );
    let _ = writeln!(out, "  zones:");
    for (i, zone) in d.zones.iter().enumerate() {
        let last = zone
            .last_temperature
            .map(|t| format_temp(t, unit))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "    #{} {}  threshold {}  last {}{}",
            i,
            zone_label(zone),
            format_temp(zone.threshold, unit),
            last,
            if zone.enabled { "" } else { "  (disabled)" }
        );
    }
    out.truncate(out.trim_end().len());
    out
}

pub fn readings_table(readings: &[ZoneReading], unit: TempUnit) -> String {
    if readings.is_empty() {
        return "No readings yet".to_string();
    }
    readings
        .iter()
        .map(|r| {
            format!(
                "#{} {:<6} {:>8} at ({:.2}, {:.2}){}",
                r.index,
                kind_name(r.kind),
                format_temp(r.temperature, unit),
                r.hot_point.x,
                r.hot_point.y,
                if r.alarm { "  ALARM" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::{DeviceState, NormPoint, ProcessingSettings};

    fn device(id: &str, streaming: bool) -> DeviceInfo {
        DeviceInfo {
            id: id.into(),
            name: format!("Camera-{}", id),
            address: "10.0.0.5".into(),
            state: DeviceState::Active,
            streaming,
            zones: vec![AlertZone::global()],
            settings: ProcessingSettings::default(),
        }
    }

    #[test]
    fn test_format_temp_units() {
        assert_eq!(format_temp(30.0, TempUnit::Celsius), "30.0°C");
        assert_eq!(format_temp(100.0, TempUnit::Fahrenheit), "212.0°F");
    }

    #[test]
    fn test_device_table() {
        let table = device_table(&[device("cam1", true), device("cam22", false)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("Camera-cam1") && lines[1].ends_with("yes"));
        assert!(lines[2].ends_with("no"));
        assert_eq!(device_table(&[]), "No devices");
    }

    #[test]
    fn test_readings_alarm_marker() {
        let readings = vec![ZoneReading {
            index: 1,
            kind: ZoneKind::Point,
            temperature: 45.0,
            hot_point: NormPoint::new(0.5, 0.5),
            threshold: 40.0,
            alarm: true,
        }];
        let text = readings_table(&readings, TempUnit::Celsius);
        assert!(text.contains("45.0°C"));
        assert!(text.ends_with("ALARM"));
    }

    #[test]
    fn test_device_details_lists_zones() {
        let text = device_details(&device("cam1", false), TempUnit::Celsius);
        assert!(text.contains("#0 global"));
        assert!(text.contains("streaming: no"));
    }
}
