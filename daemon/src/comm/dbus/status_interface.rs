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

use crate::comm::dbus::{lookup_controller, validate_bridge_address};
use crate::hotplug::registry::Registry;
use log::info;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct StatusInterface {
    pub registry: Arc<Registry>,
}

#[interface(name = "com.canonical.fpgahpd.status")]
impl StatusInterface {
    async fn available_images(&self, bridge: &str) -> Result<String, fdo::Error> {
        info!("available_images called with bridge: {bridge}");
        let bridge = validate_bridge_address(bridge)?;
        let controller = lookup_controller(&self.registry, &bridge)?;
        Ok(controller.available_images()?)
    }

    async fn get_reload_state(&self, bridge: &str) -> Result<String, fdo::Error> {
        info!("get_reload_state called with bridge: {bridge}");
        let bridge = validate_bridge_address(bridge)?;
        let controller = lookup_controller(&self.registry, &bridge)?;
        Ok(controller.manager().state().to_string())
    }

    /// One line per controller: slot name, bridge address, card name,
    /// reload state and whether a card is currently bound.
    async fn list_slots(&self) -> Result<String, fdo::Error> {
        info!("list_slots called");
        let mut lines = Vec::new();
        for controller in self.registry.controllers() {
            let manager = controller.manager();
            let binding = if manager.is_registered() {
                "registered"
            } else {
                "retained"
            };
            lines.push(format!(
                "{} {} {} {} {}",
                controller.slot().name(),
                controller.bridge(),
                manager.name(),
                manager.state(),
                binding
            ));
        }
        Ok(lines.join("\n"))
    }
}
