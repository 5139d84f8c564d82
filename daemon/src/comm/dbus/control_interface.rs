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

use crate::comm::dbus::{lookup_controller, validate_bridge_address, validate_device_path};
use crate::error::FpgahpError;
use crate::hotplug::bmc::SysfsBmcTrigger;
use crate::hotplug::manager::ManagerOps;
use crate::hotplug::registry::Registry;
use log::info;
use std::sync::Arc;
use zbus::{fdo, interface};

/// Ops bound to cards registered over DBus. Such cards have no in-process
/// teardown work beyond what the reload protocol already does, so the
/// inherited no-op prepare applies. One shared instance keeps repeated
/// `register_card` calls idempotent.
struct DbusCard;

impl ManagerOps for DbusCard {}

pub struct ControlInterface {
    registry: Arc<Registry>,
    card_ops: Arc<dyn ManagerOps>,
}

impl ControlInterface {
    pub fn new(registry: Arc<Registry>) -> Self {
        ControlInterface {
            registry,
            card_ops: Arc::new(DbusCard),
        }
    }
}

#[interface(name = "com.canonical.fpgahpd.control")]
impl ControlInterface {
    async fn register_card(
        &self,
        bridge: &str,
        device_path: &str,
        name: &str,
    ) -> Result<String, fdo::Error> {
        info!("register_card called with bridge: {bridge}, device: {device_path}, name: {name}");
        let bridge = validate_bridge_address(bridge)?;
        let device = validate_device_path(device_path)?;
        let controller = self
            .registry
            .register(&bridge, &device, name, self.card_ops.clone())?;
        Ok(format!(
            "card '{name}' registered on slot {}",
            controller.slot().name()
        ))
    }

    async fn unregister_card(&self, bridge: &str) -> Result<String, fdo::Error> {
        info!("unregister_card called with bridge: {bridge}");
        let bridge = validate_bridge_address(bridge)?;
        let controller = lookup_controller(&self.registry, &bridge)?;
        self.registry.unregister(&controller);
        Ok(format!("card unregistered from bridge {bridge}"))
    }

    async fn register_bmc(&self, bmc_device_path: &str) -> Result<String, fdo::Error> {
        info!("register_bmc called with device: {bmc_device_path}");
        let bmc_device = validate_device_path(bmc_device_path)?;
        let trigger = Arc::new(SysfsBmcTrigger::new(bmc_device.clone()));
        let controller = self.registry.register_trigger(&bmc_device, trigger)?;
        Ok(format!(
            "BMC trigger bound to slot {}",
            controller.slot().name()
        ))
    }

    async fn unregister_bmc(&self, bridge: &str) -> Result<String, fdo::Error> {
        info!("unregister_bmc called with bridge: {bridge}");
        let bridge = validate_bridge_address(bridge)?;
        let controller = lookup_controller(&self.registry, &bridge)?;
        self.registry.unregister_trigger(&controller);
        Ok(format!("BMC trigger unregistered from bridge {bridge}"))
    }

    async fn image_load(&self, bridge: &str, image: &str) -> Result<String, fdo::Error> {
        info!("image_load called with bridge: {bridge} and image: {image}");
        let bridge = validate_bridge_address(bridge)?;
        let controller = lookup_controller(&self.registry, &bridge)?;
        // The protocol blocks for the whole settle time; keep it off the
        // runtime worker threads.
        let selected = image.to_string();
        tokio::task::spawn_blocking(move || controller.image_load(&selected))
            .await
            .map_err(|e| FpgahpError::Internal(format!("reload task failed: {e}")))??;
        Ok(format!("image '{image}' loaded on bridge {bridge}"))
    }
}
