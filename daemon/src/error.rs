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

use log::error;
use std::path::PathBuf;
use zbus::fdo;

/// Errors surfaced by the hotplug registry, the reload protocol and the
/// sysfs plumbing underneath them.
///
/// The reload protocol distinguishes two failure classes: `Argument` and
/// `State` are precondition failures, returned before any side effect has
/// happened; `Prepare`, `Trigger`, `Link`, `PowerFault` and `Rescan` are
/// mid-protocol failures and mean the bus may have been left in a partially
/// torn-down state that requires operator attention.
#[derive(Debug, thiserror::Error)]
pub enum FpgahpError {
    #[error("FpgahpError::Argument: {0}")]
    Argument(String),
    #[error("FpgahpError::State: Operation attempted on an unbound manager or trigger: {0}")]
    State(String),
    #[error("FpgahpError::Prepare: Reload prepare callback failed: {0}")]
    Prepare(String),
    #[error("FpgahpError::Trigger: BMC image trigger failed: {0}")]
    Trigger(String),
    #[error("FpgahpError::Link: PCIe link operation failed: {0}")]
    Link(String),
    #[error("FpgahpError::PowerFault: Power fault latched on slot {0}")]
    PowerFault(String),
    #[error("FpgahpError::Rescan: Bus re-enumeration failed: {0}")]
    Rescan(String),
    #[error("FpgahpError::IORead: An IO error occurred when reading from {file:?}: {e}")]
    IORead { file: PathBuf, e: std::io::Error },
    #[error("FpgahpError::IOWrite: An IO error occurred when writing {data:?} to {file:?}: {e}")]
    IOWrite {
        data: String,
        file: PathBuf,
        e: std::io::Error,
    },
    #[error("FpgahpError::IOReadDir: An IO error occurred when reading directory {dir:?}: {e}")]
    IOReadDir { dir: PathBuf, e: std::io::Error },
    #[error("FpgahpError::Internal: An Internal error occurred: {0}")]
    Internal(String),
}

impl From<FpgahpError> for fdo::Error {
    fn from(err: FpgahpError) -> Self {
        error!("{err}");
        match err {
            FpgahpError::Argument(..) => fdo::Error::InvalidArgs(err.to_string()),
            FpgahpError::IORead { .. } => fdo::Error::IOError(err.to_string()),
            FpgahpError::IOWrite { .. } => fdo::Error::IOError(err.to_string()),
            FpgahpError::IOReadDir { .. } => fdo::Error::IOError(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}
