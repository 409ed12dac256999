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

//! Thermocam - command-line client for the thermocamd fleet daemon
//!
//! Talks to the daemon's control socket to list devices, start and stop
//! streams, and edit alert zones and processing settings.

pub mod client;
pub mod display;

pub use client::ControlClient;
