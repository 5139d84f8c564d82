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

//! Hotplug controller registry and image-reload state machine.
//!
//! The pieces, leaves first:
//!
//! - [`manager`] - the data model: a [`manager::Manager`] binds one FPGA
//!   card to its reload policy and embeds one trigger, the handle on the
//!   out-of-band BMC reload agent.
//! - [`registry`] - long-lived [`registry::Controller`]s (bridge + slot +
//!   manager), created on first registration and retained across
//!   register/unregister cycles for slot reuse.
//! - [`reload`] - the ordered reload protocol: sibling teardown, prepare,
//!   trigger, link disable, bus detachment, settle wait, link re-enable,
//!   rescan.
//! - [`bmc`] - the sysfs-backed trigger implementation over a BMC
//!   secure-update driver's attributes.

pub mod bmc;
pub mod manager;
pub mod registry;
pub mod reload;

#[cfg(test)]
pub(crate) mod testing;
