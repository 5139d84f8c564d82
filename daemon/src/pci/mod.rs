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

//! PCI bus topology primitives.
//!
//! This module defines the [`BusManager`] trait, the seam between the reload
//! protocol and the PCI bus: slot registration, link control, power state and
//! device enumeration. The production implementation is
//! [`sysfs::SysfsBusManager`], which drives the kernel through `/sys/bus/pci`;
//! tests substitute a recording mock.
//!
//! The reload orchestrator is the only writer of link state and of the
//! subordinate device set of a bridge, and it serializes itself per
//! controller; implementations only need internal mutual exclusion across
//! unrelated bridges.

pub mod sysfs;

use crate::error::FpgahpError;
use log::warn;
use std::fmt;
use std::path::{Path, PathBuf};

/// The PCI address of a hotplug bridge, in full `domain:bus:device.function`
/// form (e.g. `0000:3a:00.0`). Used as the registry key, so one controller
/// exists per bridge at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BridgeAddress(String);

impl BridgeAddress {
    /// Parse and validate a PCI address string.
    ///
    /// # Returns: `Result<BridgeAddress, FpgahpError>`
    /// * `Ok(BridgeAddress)` - Address is well-formed
    /// * `Err(FpgahpError::Argument)` - Not a `dddd:bb:dd.f` hex address
    pub fn new(addr: &str) -> Result<Self, FpgahpError> {
        if !is_pci_address(addr) {
            return Err(FpgahpError::Argument(format!(
                "{addr} is not a valid PCI address (expected domain:bus:device.function)"
            )));
        }
        Ok(BridgeAddress(addr.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BridgeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check whether `name` looks like a full PCI address, `dddd:bb:dd.f`.
/// Sysfs bus directories mix device entries with attribute files, so this is
/// also used to filter directory listings down to devices.
pub fn is_pci_address(name: &str) -> bool {
    let mut dot = name.rsplitn(2, '.');
    let (Some(func), Some(rest)) = (dot.next(), dot.next()) else {
        return false;
    };
    if func.is_empty() || !func.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    let segments: Vec<&str> = rest.split(':').collect();
    let [domain, bus, dev] = segments.as_slice() else {
        return false;
    };
    [(domain, 4), (bus, 2), (dev, 2)].iter().all(|(seg, len)| {
        seg.len() == *len && seg.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// A registered hotplug slot.
///
/// Slot registration is expensive and idempotent per bridge: the handle is
/// created once when a controller is first built for a bridge and survives
/// register/unregister cycles of the manager bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHandle {
    pub(crate) id: u32,
    pub(crate) name: String,
}

impl SlotHandle {
    /// Registration-unique id, stable for the lifetime of the controller.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// External slot name, derived from the bridge's physical slot number
    /// where the hardware reports one.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of a subordinate bus rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanOutcome {
    /// New devices were enumerated and configured.
    Configured,
    /// The devices were already present; tolerated, not an error.
    AlreadyPresent,
}

/// Topology mutation primitives consumed by the registry and the reload
/// orchestrator.
pub trait BusManager: Send + Sync {
    /// Register a hotplug slot for `bridge`. Called once per bridge; the
    /// returned handle is retained and reused across manager rebinds.
    fn register_slot(&self, bridge: &BridgeAddress) -> Result<SlotHandle, FpgahpError>;

    /// Release a slot previously obtained from [`register_slot`]. Only
    /// called at daemon teardown.
    ///
    /// [`register_slot`]: BusManager::register_slot
    fn release_slot(&self, slot: &SlotHandle) -> Result<(), FpgahpError>;

    /// Bring the bridge out of runtime suspend and hold it active.
    fn power_resume(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError>;

    /// Drop the active hold taken by [`power_resume`].
    ///
    /// [`power_resume`]: BusManager::power_resume
    fn power_suspend(&self, bridge: &BridgeAddress);

    /// List every function on the anchor device's bus, the anchor included,
    /// in discovery order.
    fn sibling_functions(&self, anchor: &Path) -> Result<Vec<PathBuf>, FpgahpError>;

    /// Stop and remove a single device.
    fn remove_device(&self, device: &Path) -> Result<(), FpgahpError>;

    /// Set the Link Disable bit on the bridge's PCIe link.
    fn disable_link(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError>;

    /// Clear the Link Disable bit on the bridge's PCIe link.
    fn enable_link(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError>;

    /// Verify link training completed after [`enable_link`].
    ///
    /// [`enable_link`]: BusManager::enable_link
    fn check_link_status(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError>;

    /// Whether a power fault is latched in the bridge's slot status.
    fn query_power_fault(&self, bridge: &BridgeAddress) -> bool;

    /// Detach every device under the bridge's subordinate bus. Device
    /// removal notifies the detached drivers synchronously, which may
    /// re-enter the registry's `unregister`.
    fn detach_subordinate_devices(&self, bridge: &BridgeAddress);

    /// Re-enumerate and configure the subordinate bus.
    fn rescan_bus(&self, bridge: &BridgeAddress) -> Result<RescanOutcome, FpgahpError>;
}

/// Scoped runtime-power hold on a hotplug bridge. The hold is dropped on
/// every exit path of the reload protocol, success or failure.
pub struct PowerContext<'a> {
    bus: &'a dyn BusManager,
    bridge: &'a BridgeAddress,
}

impl<'a> PowerContext<'a> {
    pub fn resume(bus: &'a dyn BusManager, bridge: &'a BridgeAddress) -> Result<Self, FpgahpError> {
        bus.power_resume(bridge)?;
        Ok(PowerContext { bus, bridge })
    }
}

impl Drop for PowerContext<'_> {
    fn drop(&mut self) {
        self.bus.power_suspend(self.bridge);
    }
}

/// Non-panicking counterpart of [`BusManager::release_slot`] for teardown
/// loops, where one bad slot must not keep the rest from being released.
pub(crate) fn release_slot_logged(bus: &dyn BusManager, slot: &SlotHandle) {
    if let Err(e) = bus.release_slot(slot) {
        warn!("failed to release slot {}: {e}", slot.name());
    }
}
