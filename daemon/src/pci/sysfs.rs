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

//! Sysfs-backed [`BusManager`] implementation.
//!
//! Drives the kernel's PCI core through `/sys/bus/pci/devices/`:
//!
//! - device removal via the per-device `remove` attribute
//! - subordinate bus re-enumeration via the bridge's `rescan` attribute
//! - runtime power via `power/control`
//! - PCIe link control and status through the bridge's binary `config`
//!   file, which exposes configuration space to userspace; the Link
//!   Control, Link Status and Slot Status registers are located with a
//!   capability-list walk
//!
//! A sysfs map of a hotplug bridge as used here:
//! ```text
//! /sys/bus/pci/devices/0000:3a:00.0
//! ├── 0000:3b:00.0            <- subordinate device (child directory)
//! ├── config                  <- configuration space, seekable
//! ├── power
//! │   └── control             <- "on" / "auto"
//! ├── remove
//! └── rescan
//! ```

use crate::config;
use crate::error::FpgahpError;
use crate::pci::{is_pci_address, BridgeAddress, BusManager, RescanOutcome, SlotHandle};
use crate::system_io::{fs_read_at, fs_read_dir, fs_write, fs_write_at};
use log::{info, trace, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Offset of the capability list pointer in the standard header.
const PCI_CAPABILITY_LIST: u64 = 0x34;
/// Capability id of the PCI Express capability structure.
const PCI_CAP_ID_EXP: u8 = 0x10;
/// Link Control register, relative to the PCIe capability.
const PCI_EXP_LNKCTL: u64 = 0x10;
/// Link Disable bit in Link Control.
const PCI_EXP_LNKCTL_LD: u16 = 0x0010;
/// Link Status register, relative to the PCIe capability.
const PCI_EXP_LNKSTA: u64 = 0x12;
/// Link Training bit in Link Status: set while training is in progress.
const PCI_EXP_LNKSTA_LT: u16 = 0x0800;
/// Slot Capabilities register, relative to the PCIe capability.
const PCI_EXP_SLTCAP: u64 = 0x14;
/// Physical Slot Number field shift within Slot Capabilities.
const PCI_EXP_SLTCAP_PSN_SHIFT: u32 = 19;
/// Slot Status register, relative to the PCIe capability.
const PCI_EXP_SLTSTA: u64 = 0x1A;
/// Power Fault Detected bit in Slot Status.
const PCI_EXP_SLTSTA_PFD: u16 = 0x0002;

/// Production bus manager over `/sys/bus/pci`.
#[derive(Debug)]
pub struct SysfsBusManager {
    devices_dir: PathBuf,
    next_slot_id: AtomicU32,
}

impl Default for SysfsBusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsBusManager {
    pub fn new() -> Self {
        Self::with_devices_dir(Path::new(config::PCI_DEVICES_DIR))
    }

    /// Construct against an alternate sysfs root. Exists so the device tree
    /// can be staged in a scratch directory.
    pub fn with_devices_dir(devices_dir: &Path) -> Self {
        SysfsBusManager {
            devices_dir: devices_dir.to_path_buf(),
            next_slot_id: AtomicU32::new(0),
        }
    }

    fn device_dir(&self, bridge: &BridgeAddress) -> PathBuf {
        self.devices_dir.join(bridge.as_str())
    }

    fn config_path(&self, bridge: &BridgeAddress) -> PathBuf {
        self.device_dir(bridge).join("config")
    }

    /// Subordinate devices show up as child directories of the bridge named
    /// by their PCI address. Returned in discovery order.
    fn subordinate_devices(&self, bridge: &BridgeAddress) -> Result<Vec<PathBuf>, FpgahpError> {
        let dir = self.device_dir(bridge);
        let mut names: Vec<String> = fs_read_dir(&dir)?
            .into_iter()
            .filter(|name| is_pci_address(name))
            .collect();
        names.sort();
        Ok(names.into_iter().map(|name| dir.join(name)).collect())
    }

    /// Read and set/clear the Link Disable bit, skipping the write when the
    /// bit already has the requested value.
    fn set_link_disable(&self, bridge: &BridgeAddress, disable: bool) -> Result<(), FpgahpError> {
        let cfg = self.config_path(bridge);
        let cap = find_pcie_capability(&cfg)?;
        let mut linkctl = read_config_u16(&cfg, cap + PCI_EXP_LNKCTL)?;

        if disable {
            if linkctl & PCI_EXP_LNKCTL_LD != 0 {
                return Ok(());
            }
            linkctl |= PCI_EXP_LNKCTL_LD;
        } else {
            if linkctl & PCI_EXP_LNKCTL_LD == 0 {
                return Ok(());
            }
            linkctl &= !PCI_EXP_LNKCTL_LD;
        }

        trace!("writing link control {linkctl:#06x} for {bridge}");
        write_config_u16(&cfg, cap + PCI_EXP_LNKCTL, linkctl)
    }
}

impl BusManager for SysfsBusManager {
    fn register_slot(&self, bridge: &BridgeAddress) -> Result<SlotHandle, FpgahpError> {
        let cfg = self.config_path(bridge);
        let cap = find_pcie_capability(&cfg)?;
        let mut sltcap = [0u8; 4];
        fs_read_at(&cfg, cap + PCI_EXP_SLTCAP, &mut sltcap)?;
        let psn = u32::from_le_bytes(sltcap) >> PCI_EXP_SLTCAP_PSN_SHIFT;

        let id = self.next_slot_id.fetch_add(1, Ordering::Relaxed);
        // Slots without a physical slot number fall back to the bridge address.
        let name = if psn != 0 {
            psn.to_string()
        } else {
            bridge.to_string()
        };
        info!("Slot [{name}] registered for bridge {bridge}");
        Ok(SlotHandle { id, name })
    }

    fn release_slot(&self, slot: &SlotHandle) -> Result<(), FpgahpError> {
        trace!("Slot [{}] released", slot.name());
        Ok(())
    }

    fn power_resume(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError> {
        fs_write(&self.device_dir(bridge).join("power/control"), "on")
    }

    fn power_suspend(&self, bridge: &BridgeAddress) {
        if let Err(e) = fs_write(&self.device_dir(bridge).join("power/control"), "auto") {
            warn!("failed to return {bridge} to runtime pm: {e}");
        }
    }

    fn sibling_functions(&self, anchor: &Path) -> Result<Vec<PathBuf>, FpgahpError> {
        let parent = anchor.parent().ok_or_else(|| {
            FpgahpError::Argument(format!("device path {anchor:?} has no parent bus"))
        })?;
        let mut names: Vec<String> = fs_read_dir(parent)?
            .into_iter()
            .filter(|name| is_pci_address(name))
            .collect();
        names.sort();
        Ok(names.into_iter().map(|name| parent.join(name)).collect())
    }

    fn remove_device(&self, device: &Path) -> Result<(), FpgahpError> {
        trace!("removing {device:?}");
        fs_write(&device.join("remove"), "1")
    }

    fn disable_link(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError> {
        self.set_link_disable(bridge, true)
    }

    fn enable_link(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError> {
        self.set_link_disable(bridge, false)
    }

    fn check_link_status(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError> {
        let cfg = self.config_path(bridge);
        let cap = find_pcie_capability(&cfg)?;
        let deadline = Instant::now() + Duration::from_millis(config::LINK_TRAINING_WAIT_MS);

        loop {
            let lnksta = read_config_u16(&cfg, cap + PCI_EXP_LNKSTA)?;
            if lnksta & PCI_EXP_LNKSTA_LT == 0 {
                trace!("link training complete for {bridge} (lnksta {lnksta:#06x})");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FpgahpError::Link(format!(
                    "link training did not complete for {bridge} (lnksta {lnksta:#06x})"
                )));
            }
            std::thread::sleep(Duration::from_millis(config::LINK_TRAINING_POLL_MS));
        }
    }

    fn query_power_fault(&self, bridge: &BridgeAddress) -> bool {
        let cfg = self.config_path(bridge);
        let sltsta = find_pcie_capability(&cfg)
            .and_then(|cap| read_config_u16(&cfg, cap + PCI_EXP_SLTSTA));
        match sltsta {
            Ok(sltsta) => sltsta & PCI_EXP_SLTSTA_PFD != 0,
            Err(e) => {
                warn!("could not read slot status for {bridge}: {e}");
                false
            }
        }
    }

    fn detach_subordinate_devices(&self, bridge: &BridgeAddress) {
        let devices = match self.subordinate_devices(bridge) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("could not list devices under {bridge}: {e}");
                return;
            }
        };
        for device in devices.iter().rev() {
            if let Err(e) = self.remove_device(device) {
                warn!("failed to remove {device:?}: {e}");
            }
        }
    }

    fn rescan_bus(&self, bridge: &BridgeAddress) -> Result<RescanOutcome, FpgahpError> {
        let already_present = self
            .subordinate_devices(bridge)
            .map(|devices| !devices.is_empty())
            .unwrap_or(false);

        fs_write(&self.device_dir(bridge).join("rescan"), "1")
            .map_err(|e| FpgahpError::Rescan(format!("rescan of {bridge} failed: {e}")))?;

        if already_present {
            Ok(RescanOutcome::AlreadyPresent)
        } else {
            Ok(RescanOutcome::Configured)
        }
    }
}

/// Walk the capability list of the device behind `config` and return the
/// offset of the PCI Express capability structure.
///
/// # Returns: `Result<u64, FpgahpError>`
/// * `Ok(u64)` - Offset of the capability within configuration space
/// * `Err(FpgahpError::Link)` - Device has no PCIe capability or the list is corrupt
/// * `Err(FpgahpError::IORead)` - Configuration space unreadable
fn find_pcie_capability(config: &Path) -> Result<u64, FpgahpError> {
    let mut ptr = [0u8; 1];
    fs_read_at(config, PCI_CAPABILITY_LIST, &mut ptr)?;
    let mut offset = ptr[0] & 0xFC;

    // 48 is the most capabilities that fit in 256 bytes of config space;
    // anything longer means a looping list.
    for _ in 0..48 {
        if offset == 0 {
            break;
        }
        let mut header = [0u8; 2];
        fs_read_at(config, offset as u64, &mut header)?;
        if header[0] == PCI_CAP_ID_EXP {
            return Ok(offset as u64);
        }
        offset = header[1] & 0xFC;
    }

    Err(FpgahpError::Link(format!(
        "no PCI Express capability found in {config:?}"
    )))
}

fn read_config_u16(config: &Path, offset: u64) -> Result<u16, FpgahpError> {
    let mut buf = [0u8; 2];
    fs_read_at(config, offset, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn write_config_u16(config: &Path, offset: u64, value: u16) -> Result<(), FpgahpError> {
    fs_write_at(config, offset, &value.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use std::io::Write;

    /// Build a minimal config space: capability pointer at 0x34 leading to a
    /// power-management capability at 0x40 chained to a PCIe capability at
    /// 0x50, with the given Link Control value.
    fn write_fake_config(dir: &Path, linkctl: u16) -> PathBuf {
        let mut space = vec![0u8; 0x100];
        space[PCI_CAPABILITY_LIST as usize] = 0x40;
        space[0x40] = 0x01; // PCI_CAP_ID_PM
        space[0x41] = 0x50;
        space[0x50] = PCI_CAP_ID_EXP;
        space[0x51] = 0x00;
        space[0x60..0x62].copy_from_slice(&linkctl.to_le_bytes()); // 0x50 + LNKCTL
        let path = dir.join("config");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(&space))
            .expect("failed to stage config space");
        path
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fpgahpd-sysfs-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("failed to create scratch dir");
        dir
    }

    #[gtest]
    fn capability_walk_finds_pcie_capability() {
        let dir = scratch_dir("walk");
        let cfg = write_fake_config(&dir, 0);
        assert_that!(find_pcie_capability(&cfg), ok(eq(&0x50u64)));
    }

    #[gtest]
    fn capability_walk_rejects_device_without_pcie() {
        let dir = scratch_dir("no-exp");
        let cfg = write_fake_config(&dir, 0);
        // Truncate the chain after the PM capability.
        fs_write_at(&cfg, 0x41, &[0u8]).unwrap();
        assert_that!(
            find_pcie_capability(&cfg),
            err(displays_as(contains_substring("no PCI Express capability")))
        );
    }

    #[gtest]
    fn link_disable_round_trip() {
        let dir = scratch_dir("lnkctl");
        let bridge = BridgeAddress::new("0000:3a:00.0").unwrap();
        let bridge_dir = dir.join(bridge.as_str());
        std::fs::create_dir_all(&bridge_dir).unwrap();
        let cfg = write_fake_config(&bridge_dir, 0x0040);

        let bus = SysfsBusManager::with_devices_dir(&dir);
        bus.disable_link(&bridge).unwrap();
        assert_that!(
            read_config_u16(&cfg, 0x50 + PCI_EXP_LNKCTL).unwrap() & PCI_EXP_LNKCTL_LD,
            eq(PCI_EXP_LNKCTL_LD)
        );
        // Second disable is a no-op, not an error.
        bus.disable_link(&bridge).unwrap();

        bus.enable_link(&bridge).unwrap();
        let linkctl = read_config_u16(&cfg, 0x50 + PCI_EXP_LNKCTL).unwrap();
        assert_that!(linkctl & PCI_EXP_LNKCTL_LD, eq(0));
        // Unrelated Link Control bits survive the round trip.
        assert_that!(linkctl, eq(0x0040));
    }

    #[gtest]
    fn subordinate_listing_filters_attributes() {
        let dir = scratch_dir("subordinates");
        let bridge = BridgeAddress::new("0000:3a:00.0").unwrap();
        let bridge_dir = dir.join(bridge.as_str());
        std::fs::create_dir_all(bridge_dir.join("0000:3b:00.1")).unwrap();
        std::fs::create_dir_all(bridge_dir.join("0000:3b:00.0")).unwrap();
        std::fs::create_dir_all(bridge_dir.join("power")).unwrap();
        std::fs::File::create(bridge_dir.join("rescan")).unwrap();

        let bus = SysfsBusManager::with_devices_dir(&dir);
        let devices = bus.subordinate_devices(&bridge).unwrap();
        assert_that!(
            devices,
            eq(&vec![
                bridge_dir.join("0000:3b:00.0"),
                bridge_dir.join("0000:3b:00.1")
            ])
        );
    }
}
