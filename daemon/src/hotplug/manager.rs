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

//! Manager and trigger data model.
//!
//! A [`Manager`] is the registered binding between one FPGA card and its
//! reload policy; it embeds one [`Trigger`], the abstraction over the
//! out-of-band BMC reload agent. Both sides register independently: the card
//! driver binds the manager, the BMC driver later binds the trigger to the
//! manager whose card device is an ancestor of the BMC device.
//!
//! One mutex protects the whole record. The reload protocol holds it only for
//! administrative steps and releases it before any bus topology mutation,
//! because device removal re-enters `unregister` on this same manager.

use crate::error::FpgahpError;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Progress of the most recent image reload on a manager.
///
/// `Unknown` is also the state after every successful register or rebind.
/// Transitions happen only inside the reload protocol, and `Loading` is never
/// observable once an `image_load` call has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Unknown,
    Loading,
    Done,
    Failed,
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReloadState::Unknown => "unknown",
            ReloadState::Loading => "loading",
            ReloadState::Done => "done",
            ReloadState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Card-side reload policy callbacks.
pub trait ManagerOps: Send + Sync {
    /// Remove further non-reserved devices below the card before the reload
    /// is triggered. The default does nothing; cards without extra teardown
    /// needs simply inherit it.
    fn prepare(&self) -> Result<(), FpgahpError> {
        Ok(())
    }
}

/// Capability set of a BMC reload agent.
pub trait TriggerOps: Send + Sync {
    /// List the images the BMC can load, as human-readable text.
    fn available_images(&self) -> Result<String, FpgahpError>;

    /// Start an out-of-band reload of the image named by `selector` and
    /// report how long the card needs before it can be re-enumerated.
    ///
    /// The selector is an opaque payload chosen by the operator; its wire
    /// format is the BMC's business. A successful return means reprogramming
    /// has irreversibly begun.
    fn image_trigger(&self, selector: &[u8]) -> Result<Duration, FpgahpError>;
}

/// The trigger half of a manager. Discovered, not created: a BMC driver
/// binds it via the registry's ancestry lookup.
#[derive(Default)]
pub(crate) struct Trigger {
    pub registered: bool,
    pub bmc_device: Option<PathBuf>,
    pub ops: Option<Arc<dyn TriggerOps>>,
}

/// Lock-protected manager record. `device` and `ops` are meaningful only
/// while `registered` is set; they are rebound on every register/reuse
/// transition and never read while unset.
pub(crate) struct ManagerInner {
    pub registered: bool,
    pub name: String,
    pub device: Option<PathBuf>,
    pub ops: Option<Arc<dyn ManagerOps>>,
    pub state: ReloadState,
    pub trigger: Trigger,
}

pub struct Manager {
    inner: Mutex<ManagerInner>,
}

impl Manager {
    pub(crate) fn new() -> Self {
        Manager {
            inner: Mutex::new(ManagerInner {
                registered: false,
                name: String::new(),
                device: None,
                ops: None,
                state: ReloadState::Unknown,
                trigger: Trigger::default(),
            }),
        }
    }

    /// A poisoned manager lock means a thread panicked mid-protocol; there
    /// is no sane recovery for the daemon beyond restarting it.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        self.inner.lock().expect("manager lock poisoned")
    }

    pub fn is_registered(&self) -> bool {
        self.lock().registered
    }

    pub fn state(&self) -> ReloadState {
        self.lock().state
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }
}
