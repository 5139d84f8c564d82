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

pub mod control_interface;
pub mod status_interface;

use crate::error::FpgahpError;
use crate::hotplug::registry::{Controller, Registry};
use crate::pci::BridgeAddress;
use std::path::PathBuf;
use std::sync::Arc;

/// Helper function to check that a caller-supplied bridge address is a
/// well-formed PCI address before it is used as a registry key.
pub(crate) fn validate_bridge_address(addr: &str) -> Result<BridgeAddress, FpgahpError> {
    BridgeAddress::new(addr)
}

/// Helper function to check that a caller-supplied device path is a
/// plausible sysfs device directory.
pub(crate) fn validate_device_path(path_str: &str) -> Result<PathBuf, FpgahpError> {
    if path_str.is_empty() || !path_str.is_ascii() {
        return Err(FpgahpError::Argument(format!(
            "{path_str:?} is an invalid device path. \
                Device paths must be non-empty ascii sysfs paths."
        )));
    }
    let path = PathBuf::from(path_str);
    if !path.is_absolute() {
        return Err(FpgahpError::Argument(format!(
            "device path {path_str} is not absolute"
        )));
    }
    Ok(path)
}

/// Resolve the controller for `bridge` or fail with a `State` error the
/// caller can act on.
pub(crate) fn lookup_controller(
    registry: &Registry,
    bridge: &BridgeAddress,
) -> Result<Arc<Controller>, FpgahpError> {
    registry.lookup(bridge).ok_or_else(|| {
        FpgahpError::State(format!("no controller exists for bridge {bridge}"))
    })
}
