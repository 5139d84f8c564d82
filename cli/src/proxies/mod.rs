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

//! DBus proxy interfaces for the fpgahpd daemon.
//!
//! Auto-generated proxy traits over the `zbus` `#[proxy]` macro, giving the
//! CLI type-safe async access to the daemon's interfaces.
//!
//! # DBus Service Information
//!
//! - **Service Name**: `com.canonical.fpgahpd`
//! - **Control Interface**: `com.canonical.fpgahpd.control` at `/com/canonical/fpgahpd/control`
//! - **Status Interface**: `com.canonical.fpgahpd.status` at `/com/canonical/fpgahpd/status`

pub mod control_proxy;
pub mod status_proxy;
