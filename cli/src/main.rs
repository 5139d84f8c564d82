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

//! Command line client for the fpgahpd daemon.
//!
//! Each subcommand maps onto one method of the daemon's DBus interfaces and
//! prints the daemon's reply. `load` can block for the card's whole settle
//! time, which is ten seconds or more on real hardware.

mod proxies;

use clap::{Parser, Subcommand};
use log::debug;
use zbus::Connection;

use crate::proxies::control_proxy::ControlProxy;
use crate::proxies::status_proxy::StatusProxy;

#[derive(Parser, Debug)]
#[command(
    name = "fpgahp_cli",
    about = "Manage image reload of hot-pluggable FPGA cards over PCIe"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every hotplug slot the daemon knows about
    Slots,
    /// Show the reload state of the card behind a bridge
    State {
        /// PCI address of the hotplug bridge, e.g. 0000:3a:00.0
        bridge: String,
    },
    /// List the images the card's BMC can boot
    Images {
        /// PCI address of the hotplug bridge
        bridge: String,
    },
    /// Reload the card with a new image
    Load {
        /// PCI address of the hotplug bridge
        bridge: String,
        /// Image name from the `images` listing, e.g. fpga_user1
        image: String,
    },
    /// Register an FPGA card on a hotplug bridge
    RegisterCard {
        /// PCI address of the hotplug bridge
        bridge: String,
        /// Sysfs path of the card's anchor PCI function
        device: String,
        /// Card name, e.g. n6000
        name: String,
    },
    /// Unregister the card on a hotplug bridge
    UnregisterCard {
        /// PCI address of the hotplug bridge
        bridge: String,
    },
    /// Register a BMC reload agent for the card that owns it
    RegisterBmc {
        /// Sysfs path of the BMC secure-update device
        device: String,
    },
    /// Unregister the BMC reload agent on a hotplug bridge
    UnregisterBmc {
        /// PCI address of the hotplug bridge
        bridge: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("parsed cli command with {cli:?}");

    let connection = Connection::system().await?;
    let reply = match cli.command {
        Commands::Slots => StatusProxy::new(&connection).await?.list_slots().await?,
        Commands::State { bridge } => {
            StatusProxy::new(&connection)
                .await?
                .get_reload_state(&bridge)
                .await?
        }
        Commands::Images { bridge } => {
            StatusProxy::new(&connection)
                .await?
                .available_images(&bridge)
                .await?
        }
        Commands::Load { bridge, image } => {
            ControlProxy::new(&connection)
                .await?
                .image_load(&bridge, &image)
                .await?
        }
        Commands::RegisterCard {
            bridge,
            device,
            name,
        } => {
            ControlProxy::new(&connection)
                .await?
                .register_card(&bridge, &device, &name)
                .await?
        }
        Commands::UnregisterCard { bridge } => {
            ControlProxy::new(&connection)
                .await?
                .unregister_card(&bridge)
                .await?
        }
        Commands::RegisterBmc { device } => {
            ControlProxy::new(&connection)
                .await?
                .register_bmc(&device)
                .await?
        }
        Commands::UnregisterBmc { bridge } => {
            ControlProxy::new(&connection)
                .await?
                .unregister_bmc(&bridge)
                .await?
        }
    };
    println!("{reply}");
    Ok(())
}
