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

//! Hotplug controller registry.
//!
//! A [`Controller`] pairs one hotplug bridge with its registered slot, its
//! [`Manager`] and the per-controller reload serialization lock. Controllers
//! are long-lived: `unregister` only clears the manager's registered flag and
//! keeps the controller (and its slot registration) in the registry, so a
//! later `register` for the same bridge reuses them instead of paying for a
//! second slot registration. Controllers are only destroyed by
//! [`Registry::teardown_all`] at daemon shutdown.
//!
//! `unregister` deliberately takes no registry lock: it is frequently called
//! from inside the reload protocol's own bus detachment, on the very manager
//! the protocol is driving.
//!
//! Lock order is registry, then manager, both short-held; neither is ever
//! held across a reload.

use crate::error::FpgahpError;
use crate::pci::{release_slot_logged, BridgeAddress, BusManager, SlotHandle};
use crate::hotplug::manager::{Manager, ManagerInner, ManagerOps, ReloadState, TriggerOps};
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// One hotplug bridge with its slot, manager and reload serialization lock.
pub struct Controller {
    bridge: BridgeAddress,
    slot: SlotHandle,
    bus: Arc<dyn BusManager>,
    manager: Manager,
    /// Serializes whole `image_load` runs; protects no data.
    pub(crate) reload_lock: Mutex<()>,
}

impl Controller {
    pub fn bridge(&self) -> &BridgeAddress {
        &self.bridge
    }

    pub fn slot(&self) -> &SlotHandle {
        &self.slot
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub(crate) fn bus(&self) -> &dyn BusManager {
        self.bus.as_ref()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("bridge", &self.bridge)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// Process-wide collection of controllers, keyed by bridge address.
///
/// Constructed once at startup and passed by `Arc` to every call site; there
/// is no ambient global instance.
pub struct Registry {
    bus: Arc<dyn BusManager>,
    controllers: Mutex<HashMap<BridgeAddress, Arc<Controller>>>,
}

impl Registry {
    pub fn new(bus: Arc<dyn BusManager>) -> Self {
        Registry {
            bus,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    fn lock_controllers(&self) -> MutexGuard<'_, HashMap<BridgeAddress, Arc<Controller>>> {
        self.controllers.lock().expect("registry lock poisoned")
    }

    /// Bind (or rebind) a card to the controller for `bridge`.
    ///
    /// Idempotent for an exact `(bridge, device, ops)` match; reuses a
    /// retained controller when the bridge is known but currently
    /// unregistered; otherwise registers a slot and creates a controller.
    /// Every bind transition resets the reload state to `Unknown`.
    ///
    /// # Returns: `Result<Arc<Controller>, FpgahpError>`
    /// * `Ok(Arc<Controller>)` - The bound controller
    /// * `Err(FpgahpError::Argument)` - Empty device path or name
    /// * `Err(FpgahpError::State)` - Bridge already claimed by a different card
    pub fn register(
        &self,
        bridge: &BridgeAddress,
        device: &Path,
        name: &str,
        ops: Arc<dyn ManagerOps>,
    ) -> Result<Arc<Controller>, FpgahpError> {
        if device.as_os_str().is_empty() {
            return Err(FpgahpError::Argument(
                "cannot register a card with an empty device path".into(),
            ));
        }
        if name.is_empty() {
            return Err(FpgahpError::Argument(
                "cannot register a card with an empty name".into(),
            ));
        }
        debug!("register card {device:?} on hotplug bridge {bridge}");

        let mut controllers = self.lock_controllers();

        if let Some(controller) = controllers.get(bridge) {
            let mut inner = controller.manager.lock();
            if inner.registered {
                let same_device = inner.device.as_deref() == Some(device);
                let same_ops = inner.ops.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, &ops));
                if same_device && same_ops {
                    debug!("controller for {bridge} already bound to this card");
                    return Ok(Arc::clone(controller));
                }
                return Err(FpgahpError::State(format!(
                    "bridge {bridge} is already claimed by card '{}'",
                    inner.name
                )));
            }
            debug!("reusing retained controller for {bridge}");
            Self::bind(&mut inner, device, name, ops);
            return Ok(Arc::clone(controller));
        }

        let slot = self.bus.register_slot(bridge)?;
        let controller = Arc::new(Controller {
            bridge: bridge.clone(),
            slot,
            bus: Arc::clone(&self.bus),
            manager: Manager::new(),
            reload_lock: Mutex::new(()),
        });
        Self::bind(&mut controller.manager.lock(), device, name, ops);
        controllers.insert(bridge.clone(), Arc::clone(&controller));
        info!("controller created for bridge {bridge}");
        Ok(controller)
    }

    fn bind(inner: &mut ManagerInner, device: &Path, name: &str, ops: Arc<dyn ManagerOps>) {
        inner.device = Some(device.to_path_buf());
        inner.name = name.to_string();
        inner.ops = Some(ops);
        inner.state = ReloadState::Unknown;
        inner.registered = true;
    }

    /// Drop the manager binding. The controller, its slot and its trigger
    /// binding stay put for reuse; only the registered flag is cleared.
    ///
    /// Safe to call from within a bus detachment (this takes only the
    /// manager lock, which the reload protocol has released by then).
    pub fn unregister(&self, controller: &Controller) {
        debug!("unregister card on bridge {}", controller.bridge());
        controller.manager.lock().registered = false;
    }

    /// Bind a BMC reload agent to the manager whose card device is an
    /// ancestor of `bmc_device`.
    ///
    /// # Returns: `Result<Arc<Controller>, FpgahpError>`
    /// * `Ok(Arc<Controller>)` - Controller the trigger was bound to
    /// * `Err(FpgahpError::Argument)` - Empty path, or no registered card is an ancestor
    pub fn register_trigger(
        &self,
        bmc_device: &Path,
        ops: Arc<dyn TriggerOps>,
    ) -> Result<Arc<Controller>, FpgahpError> {
        if bmc_device.as_os_str().is_empty() {
            return Err(FpgahpError::Argument(
                "cannot register a BMC trigger with an empty device path".into(),
            ));
        }
        let owner = self.find_bmc_owner(bmc_device).ok_or_else(|| {
            FpgahpError::Argument(format!(
                "no registered card is an ancestor of BMC device {bmc_device:?}"
            ))
        })?;

        let mut inner = owner.manager.lock();
        inner.trigger.bmc_device = Some(bmc_device.to_path_buf());
        inner.trigger.ops = Some(ops);
        inner.trigger.registered = true;
        drop(inner);

        info!("BMC trigger bound to slot {}", owner.slot().name());
        Ok(owner)
    }

    /// Clear the trigger's registered flag, nothing else.
    pub fn unregister_trigger(&self, controller: &Controller) {
        let mut inner = controller.manager.lock();
        debug!(
            "unregister BMC trigger {:?} on bridge {}",
            inner.trigger.bmc_device,
            controller.bridge()
        );
        inner.trigger.registered = false;
    }

    /// Walk `candidate`'s ancestor chain for the first registered manager
    /// whose card device is an ancestor. BMC devices are subordinate devices
    /// of the card, so the card's sysfs path is a prefix of theirs.
    pub fn find_bmc_owner(&self, candidate: &Path) -> Option<Arc<Controller>> {
        let controllers = self.lock_controllers();
        for controller in controllers.values() {
            let inner = controller.manager.lock();
            if !inner.registered {
                continue;
            }
            if let Some(device) = &inner.device {
                if candidate.starts_with(device) {
                    return Some(Arc::clone(controller));
                }
            }
        }
        None
    }

    pub fn lookup(&self, bridge: &BridgeAddress) -> Option<Arc<Controller>> {
        self.lock_controllers().get(bridge).cloned()
    }

    /// All controllers, registered or retained, ordered by bridge address.
    pub fn controllers(&self) -> Vec<Arc<Controller>> {
        let mut all: Vec<Arc<Controller>> = self.lock_controllers().values().cloned().collect();
        all.sort_by(|a, b| a.bridge().as_str().cmp(b.bridge().as_str()));
        all
    }

    /// Remove every controller and release every slot. Daemon shutdown only.
    pub fn teardown_all(&self) {
        let mut controllers = self.lock_controllers();
        for (bridge, controller) in controllers.drain() {
            let mut inner = controller.manager.lock();
            inner.registered = false;
            inner.trigger.registered = false;
            drop(inner);
            release_slot_logged(self.bus.as_ref(), controller.slot());
            debug!("controller for bridge {bridge} torn down");
        }
    }
}
