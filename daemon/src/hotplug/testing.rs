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

//! Recording mocks for the bus manager, the card ops and the BMC trigger.
//!
//! All three write into one shared event log so tests can assert cross
//! component ordering of the reload protocol.

use crate::error::FpgahpError;
use crate::hotplug::manager::{ManagerOps, TriggerOps};
use crate::pci::{BridgeAddress, BusManager, RescanOutcome, SlotHandle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

fn device_name(device: &Path) -> String {
    device
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| device.display().to_string())
}

pub(crate) struct MockBus {
    pub log: EventLog,
    slots_registered: AtomicU32,
    slots_released: AtomicU32,
    /// Functions reported on the anchor's bus, discovery order. When empty,
    /// the anchor is reported alone.
    pub siblings: Mutex<Vec<PathBuf>>,
    pub fail_enable_link: AtomicBool,
    pub fail_link_status: AtomicBool,
    pub power_fault: AtomicBool,
    pub fail_rescan: AtomicBool,
    pub rescan_already_present: AtomicBool,
    /// Invoked from inside `detach_subordinate_devices`, the way a detached
    /// driver re-enters the registry during real removal.
    pub on_detach: Mutex<Option<Box<dyn Fn() + Send>>>,
}

impl MockBus {
    pub fn new() -> Self {
        MockBus {
            log: Arc::new(Mutex::new(Vec::new())),
            slots_registered: AtomicU32::new(0),
            slots_released: AtomicU32::new(0),
            siblings: Mutex::new(Vec::new()),
            fail_enable_link: AtomicBool::new(false),
            fail_link_status: AtomicBool::new(false),
            power_fault: AtomicBool::new(false),
            fail_rescan: AtomicBool::new(false),
            rescan_already_present: AtomicBool::new(false),
            on_detach: Mutex::new(None),
        }
    }

    fn record(&self, event: impl Into<String>) {
        self.log.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn slots_registered(&self) -> u32 {
        self.slots_registered.load(Ordering::Relaxed)
    }

    pub fn slots_released(&self) -> u32 {
        self.slots_released.load(Ordering::Relaxed)
    }
}

impl BusManager for MockBus {
    fn register_slot(&self, bridge: &BridgeAddress) -> Result<SlotHandle, FpgahpError> {
        let id = self.slots_registered.fetch_add(1, Ordering::Relaxed);
        Ok(SlotHandle {
            id,
            name: bridge.to_string(),
        })
    }

    fn release_slot(&self, _slot: &SlotHandle) -> Result<(), FpgahpError> {
        self.slots_released.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn power_resume(&self, _bridge: &BridgeAddress) -> Result<(), FpgahpError> {
        self.record("power_resume");
        Ok(())
    }

    fn power_suspend(&self, _bridge: &BridgeAddress) {
        self.record("power_suspend");
    }

    fn sibling_functions(&self, anchor: &Path) -> Result<Vec<PathBuf>, FpgahpError> {
        let siblings = self.siblings.lock().unwrap();
        if siblings.is_empty() {
            Ok(vec![anchor.to_path_buf()])
        } else {
            Ok(siblings.clone())
        }
    }

    fn remove_device(&self, device: &Path) -> Result<(), FpgahpError> {
        self.record(format!("remove {}", device_name(device)));
        Ok(())
    }

    fn disable_link(&self, _bridge: &BridgeAddress) -> Result<(), FpgahpError> {
        self.record("disable_link");
        Ok(())
    }

    fn enable_link(&self, _bridge: &BridgeAddress) -> Result<(), FpgahpError> {
        self.record("enable_link");
        if self.fail_enable_link.load(Ordering::Relaxed) {
            return Err(FpgahpError::Internal("link stuck".into()));
        }
        Ok(())
    }

    fn check_link_status(&self, bridge: &BridgeAddress) -> Result<(), FpgahpError> {
        self.record("check_link");
        if self.fail_link_status.load(Ordering::Relaxed) {
            return Err(FpgahpError::Link(format!(
                "link training did not complete for {bridge}"
            )));
        }
        Ok(())
    }

    fn query_power_fault(&self, _bridge: &BridgeAddress) -> bool {
        self.record("query_power_fault");
        self.power_fault.load(Ordering::Relaxed)
    }

    fn detach_subordinate_devices(&self, _bridge: &BridgeAddress) {
        self.record("detach");
        if let Some(hook) = self.on_detach.lock().unwrap().as_ref() {
            hook();
        }
    }

    fn rescan_bus(&self, bridge: &BridgeAddress) -> Result<RescanOutcome, FpgahpError> {
        self.record("rescan");
        if self.fail_rescan.load(Ordering::Relaxed) {
            return Err(FpgahpError::Rescan(format!("rescan of {bridge} failed")));
        }
        if self.rescan_already_present.load(Ordering::Relaxed) {
            Ok(RescanOutcome::AlreadyPresent)
        } else {
            Ok(RescanOutcome::Configured)
        }
    }
}

/// Card ops with the inherited no-op prepare.
pub(crate) struct NopOps;

impl ManagerOps for NopOps {}

/// Card ops that record the prepare call and optionally fail it.
pub(crate) struct RecordingOps {
    pub log: EventLog,
    pub fail: AtomicBool,
}

impl RecordingOps {
    pub fn new(log: EventLog) -> Self {
        RecordingOps {
            log,
            fail: AtomicBool::new(false),
        }
    }
}

impl ManagerOps for RecordingOps {
    fn prepare(&self) -> Result<(), FpgahpError> {
        self.log.lock().unwrap().push("prepare".into());
        if self.fail.load(Ordering::Relaxed) {
            return Err(FpgahpError::Internal("card teardown refused".into()));
        }
        Ok(())
    }
}

/// BMC trigger that records calls, serves a fixed listing and settle time,
/// and optionally fails the trigger step.
pub(crate) struct MockTrigger {
    pub log: EventLog,
    pub images: String,
    pub settle: Duration,
    pub fail: AtomicBool,
    /// Widens the race window in the serialization test.
    pub trigger_delay: Duration,
}

impl MockTrigger {
    pub fn new(log: EventLog) -> Self {
        MockTrigger {
            log,
            images: "factory\nuser1\nuser2".into(),
            settle: Duration::from_millis(1),
            fail: AtomicBool::new(false),
            trigger_delay: Duration::ZERO,
        }
    }
}

impl TriggerOps for MockTrigger {
    fn available_images(&self) -> Result<String, FpgahpError> {
        self.log.lock().unwrap().push("available_images".into());
        Ok(self.images.clone())
    }

    fn image_trigger(&self, selector: &[u8]) -> Result<Duration, FpgahpError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("trigger {}", String::from_utf8_lossy(selector)));
        if !self.trigger_delay.is_zero() {
            std::thread::sleep(self.trigger_delay);
        }
        if self.fail.load(Ordering::Relaxed) {
            return Err(FpgahpError::Internal("bmc refused the selector".into()));
        }
        Ok(self.settle)
    }
}
