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

//! Sysfs-backed BMC reload agent.
//!
//! Cards with a board management controller expose a secure-update device in
//! sysfs with an `available_images` listing and an `image_load` attribute.
//! Writing an image name to `image_load` asks the BMC to boot the card into
//! that image; the write returns before the card is back, so the trigger
//! quotes a settle time for the reload protocol to wait out.

use crate::config;
use crate::error::FpgahpError;
use crate::hotplug::manager::TriggerOps;
use crate::system_io::{fs_read, fs_write};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

/// A BMC secure-update device directory, e.g.
/// `/sys/bus/platform/devices/n6000bmc-sec-update.0`.
pub struct SysfsBmcTrigger {
    bmc_dir: PathBuf,
}

impl SysfsBmcTrigger {
    pub fn new(bmc_dir: PathBuf) -> Self {
        SysfsBmcTrigger { bmc_dir }
    }
}

impl TriggerOps for SysfsBmcTrigger {
    fn available_images(&self) -> Result<String, FpgahpError> {
        let listing = fs_read(&self.bmc_dir.join("available_images"))?;
        Ok(listing.trim_end().to_string())
    }

    fn image_trigger(&self, selector: &[u8]) -> Result<Duration, FpgahpError> {
        let image = std::str::from_utf8(selector).map_err(|e| {
            FpgahpError::Argument(format!("image selector is not valid UTF-8: {e}"))
        })?;
        debug!("triggering image '{image}' via {:?}", self.bmc_dir);
        fs_write(&self.bmc_dir.join("image_load"), image)?;
        // The attribute gives no completion signal and no settle hint.
        Ok(Duration::from_millis(config::DEFAULT_SETTLE_TIME_MS))
    }
}
