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

/// The kernel-decided location of PCI device objects. Typically `/sys/bus/pci/devices/`.
/// Every device and hotplug bridge the daemon touches lives below this directory.
pub static PCI_DEVICES_DIR: &str = "/sys/bus/pci/devices/";

/// Fallback settle time in milliseconds granted to the out-of-band reload agent
/// when a BMC trigger does not report its own. The reload protocol has no
/// completion signal from the card, so this is a fixed wait, not a timeout that
/// detects anything.
pub static DEFAULT_SETTLE_TIME_MS: u64 = 10_000;

/// How long to wait for PCIe link training to finish after re-enabling a link,
/// in milliseconds, polled in [`LINK_TRAINING_POLL_MS`] increments.
pub static LINK_TRAINING_WAIT_MS: u64 = 1_000;

/// Poll interval while waiting for link training, in milliseconds.
pub static LINK_TRAINING_POLL_MS: u64 = 100;
