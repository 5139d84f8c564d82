// This file is part of fpgahpd, a daemon that manages image reload of hot-pluggable FPGA cards over PCIe.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// fpgahpd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// fpgahpd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! FPGA hotplug daemon (fpgahpd) - System service for reloading FPGA card
//! images over PCIe.
//!
//! The daemon keeps a registry of hotplug controllers, one per PCIe bridge
//! with an FPGA card behind it, and drives the image reload protocol:
//! remove the card's PCI presence, ask the card's BMC to boot a new image,
//! hold the link down while it settles, then retrain the link and rescan
//! the bus.
//!
//! # DBus Service
//!
//! - **Service Name**: `com.canonical.fpgahpd`
//! - **Status Interface**: `/com/canonical/fpgahpd/status` - Read-only operations
//! - **Control Interface**: `/com/canonical/fpgahpd/control` - Write operations
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (`trace`, `debug`, `info`, `warn`, `error`
//!   or `off`). Defaults to `info`

use log::info;
use std::error::Error;
use std::sync::Arc;
use zbus::connection;

mod comm;
mod config;
mod error;
mod hotplug;
mod pci;
mod system_io;

use crate::comm::dbus::{control_interface::ControlInterface, status_interface::StatusInterface};
use crate::hotplug::registry::Registry;
use crate::pci::sysfs::SysfsBusManager;

/// Main entry point for the fpgahpd daemon.
///
/// Initializes logging via `env_logger` (defaults to "info" level), builds
/// the controller registry on top of the sysfs PCI bus manager, connects to
/// the system DBus and serves requests until terminated. On SIGINT every
/// retained controller is torn down and its slot released before exit.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bus = Arc::new(SysfsBusManager::new());
    let registry = Arc::new(Registry::new(bus));

    let status_interface = StatusInterface {
        registry: registry.clone(),
    };
    let control_interface = ControlInterface::new(registry.clone());

    let _conn = connection::Builder::system()?
        .name("com.canonical.fpgahpd")?
        .serve_at("/com/canonical/fpgahpd/status", status_interface)?
        .serve_at("/com/canonical/fpgahpd/control", control_interface)?
        .build()
        .await?;

    info!("Started com.canonical.fpgahpd dbus service");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down, releasing registered slots");
    registry.teardown_all();

    Ok(())
}
