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

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;

use tc_core::{AlertZone, Colormap, DaemonConfig, NormPoint, OverlayMode, VideoFilter};
use thermocam::display::{self, TempUnit};
use thermocam::ControlClient;

#[derive(Parser, Debug)]
#[command(name = "thermocam", version, about = "Control a thermocamd fleet daemon")]
struct Cli {
    /// Control socket (default: from the daemon config)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Daemon configuration file used to locate the socket
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print raw JSON instead of tables
    #[arg(long)]
    json: bool,

    /// Show temperatures in Fahrenheit
    #[arg(long)]
    fahrenheit: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the daemon answers
    Ping,
    /// Daemon version
    Version,
    /// List known devices
    List,
    /// Show one device
    Show { id: String },
    /// Ask an available device to start streaming
    Start { id: String },
    /// Ask a device to stop streaming
    Stop { id: String },
    /// Forget a device that is not streaming
    Remove { id: String },
    /// Set a device's display name
    Rename { id: String, name: String },
    /// Replace a device's zones with a JSON array (file or `-` for stdin)
    Zones { id: String, file: PathBuf },
    /// Add a point zone at a normalized position
    AddPoint {
        id: String,
        x: f64,
        y: f64,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Change processing settings; omitted options keep their value
    Settings {
        id: String,
        #[arg(long)]
        overlay: Option<OverlayMode>,
        #[arg(long)]
        alpha: Option<u8>,
        #[arg(long)]
        filter: Option<VideoFilter>,
        #[arg(long)]
        intensity: Option<u8>,
        #[arg(long)]
        colormap: Option<Colormap>,
    },
    /// Latest zone readings
    Readings { id: String },
}

fn socket_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    if let Some(path) = &cli.socket {
        return Ok(path.clone());
    }
    let config = DaemonConfig::load(cli.config.as_deref()).context("loading daemon config")?;
    Ok(config.control.socket_path)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_zones(file: &PathBuf) -> anyhow::Result<Vec<AlertZone>> {
    let mut text = String::new();
    if file.as_os_str() == "-" {
        std::io::stdin().read_to_string(&mut text)?;
    } else {
        text = std::fs::read_to_string(file).with_context(|| format!("reading {:?}", file))?;
    }
    serde_json::from_str(&text).context("parsing zones")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let unit = if cli.fahrenheit {
        TempUnit::Fahrenheit
    } else {
        TempUnit::Celsius
    };

    let path = socket_path(&cli)?;
    let mut client = ControlClient::connect(&path)
        .with_context(|| format!("connecting to thermocamd at {:?}", path))?;

    let device = match &cli.command {
        Command::Ping => {
            client.ping()?;
            println!("pong");
            return Ok(());
        }
        Command::Version => {
            println!("{}", client.version()?);
            return Ok(());
        }
        Command::List => {
            let devices = client.list_devices()?;
            if cli.json {
                print_json(&devices)?;
            } else {
                println!("{}", display::device_table(&devices));
            }
            return Ok(());
        }
        Command::Readings { id } => {
            let readings = client.get_readings(id)?;
            if cli.json {
                print_json(&readings)?;
            } else {
                println!("{}", display::readings_table(&readings, unit));
            }
            return Ok(());
        }
        Command::Start { id } => {
            client.start_device(id)?;
            println!("Start requested for {}", id);
            return Ok(());
        }
        Command::Stop { id } => {
            client.stop_device(id)?;
            println!("Stop requested for {}", id);
            return Ok(());
        }
        Command::Remove { id } => {
            client.remove_device(id)?;
            println!("Removed {}", id);
            return Ok(());
        }
        Command::Show { id } => client.get_device(id)?,
        Command::Rename { id, name } => client.rename_device(id, name)?,
        Command::Zones { id, file } => client.set_zones(id, read_zones(file)?)?,
        Command::AddPoint { id, x, y, threshold } => {
            let mut zones = client.get_device(id)?.zones;
            let mut zone = AlertZone::point(NormPoint::new(*x, *y));
            if let Some(t) = threshold {
                zone = zone.with_threshold(*t);
            }
            zones.push(zone);
            client.set_zones(id, zones)?
        }
        Command::Settings {
            id,
            overlay,
            alpha,
            filter,
            intensity,
            colormap,
        } => {
            let mut settings = client.get_device(id)?.settings;
            if let Some(v) = overlay {
                settings.overlay_mode = *v;
            }
            if let Some(v) = alpha {
                settings.thermo_alpha = *v;
            }
            if let Some(v) = filter {
                settings.video_filter = *v;
            }
            if let Some(v) = intensity {
                settings.filter_intensity = *v;
            }
            if let Some(v) = colormap {
                settings.heatmap_colormap = *v;
            }
            client.set_settings(id, settings)?
        }
    };

    if cli.json {
        print_json(&device)?;
    } else {
        println!("{}", display::device_details(&device, unit));
    }
    Ok(())
}
