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

//! The image reload protocol.
//!
//! `image_load` drives one complete reload of a card behind a hotplug
//! bridge: tear the card's PCI presence down, fire the BMC trigger, hold the
//! link down while the new image settles, then bring the link back and
//! re-enumerate. Runs are serialized per controller by the controller's
//! reload lock; every run ends in a terminal reload state (`Done` or
//! `Failed`) before the closing rescan, and the runtime-power hold is
//! released on every exit path.
//!
//! The manager lock is never held across bus detachment or the settle wait.
//! Detached drivers unbind synchronously and re-enter
//! [`Registry::unregister`](crate::hotplug::registry::Registry::unregister)
//! on this very manager, which takes that same lock.

use crate::error::FpgahpError;
use crate::hotplug::manager::{ManagerOps, ReloadState, TriggerOps};
use crate::hotplug::registry::Controller;
use crate::pci::{PowerContext, RescanOutcome};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

impl Controller {
    /// List the images the card's BMC can boot, one name per line.
    ///
    /// # Returns: `Result<String, FpgahpError>`
    /// * `Ok(String)` - Newline separated image names
    /// * `Err(FpgahpError::State)` - No card or no BMC trigger is registered
    pub fn available_images(&self) -> Result<String, FpgahpError> {
        let inner = self.manager().lock();
        if !inner.registered {
            return Err(FpgahpError::State(format!(
                "no card is registered on bridge {}",
                self.bridge()
            )));
        }
        let Some(ops) = inner.trigger.ops.as_ref().filter(|_| inner.trigger.registered) else {
            return Err(FpgahpError::State(format!(
                "no BMC reload agent is registered for bridge {}",
                self.bridge()
            )));
        };
        ops.available_images()
    }

    /// Reload the card behind this controller's bridge with `image`.
    ///
    /// Blocks for the whole protocol, including the settle wait the BMC
    /// quotes; callers on an async runtime must move it to a blocking
    /// thread. Concurrent calls for the same controller queue on the reload
    /// lock, and each observes the previous run's terminal state.
    ///
    /// # Returns: `Result<(), FpgahpError>`
    /// * `Ok(())` - Image loaded, link retrained, bus re-enumerated
    /// * `Err(FpgahpError::Argument)` - Empty image selector
    /// * `Err(FpgahpError::State)` - No card or trigger bound to the bridge
    /// * `Err(FpgahpError::Prepare | Trigger)` - Teardown failed; removed
    ///   functions are restored by rescan
    /// * `Err(FpgahpError::Link | PowerFault)` - The card did not come back
    /// * `Err(FpgahpError::Rescan)` - Reload itself succeeded (state is
    ///   `Done`) but re-enumeration failed
    pub fn image_load(&self, image: &str) -> Result<(), FpgahpError> {
        if image.is_empty() {
            return Err(FpgahpError::Argument(
                "cannot load an empty image selector".into(),
            ));
        }
        // Preconditions first, before anything that has a side effect.
        {
            let inner = self.manager().lock();
            if !inner.registered {
                return Err(FpgahpError::State(format!(
                    "no card is registered on bridge {}",
                    self.bridge()
                )));
            }
            if !inner.trigger.registered {
                return Err(FpgahpError::State(format!(
                    "no BMC reload agent is registered for bridge {}",
                    self.bridge()
                )));
            }
        }

        let _serialized = self.reload_lock.lock().expect("reload lock poisoned");
        let _power = PowerContext::resume(self.bus(), self.bridge())?;

        let mut inner = self.manager().lock();
        // Revalidate; the card may have gone away while this call queued.
        if !inner.registered || !inner.trigger.registered {
            return Err(FpgahpError::State(format!(
                "card or BMC trigger on bridge {} went away while waiting for reload",
                self.bridge()
            )));
        }
        let device = inner.device.clone().ok_or_else(|| {
            FpgahpError::Internal("registered manager has no device path".into())
        })?;
        let ops = inner.ops.clone().ok_or_else(|| {
            FpgahpError::Internal("registered manager has no ops".into())
        })?;
        let trigger_ops = inner.trigger.ops.clone().ok_or_else(|| {
            FpgahpError::Internal("registered trigger has no ops".into())
        })?;
        inner.state = ReloadState::Loading;
        info!("loading image '{image}' on slot {}", self.slot().name());

        let settle = match self.tear_down_card(&device, &ops, &trigger_ops, image) {
            Ok(settle) => settle,
            Err(e) => {
                inner.state = ReloadState::Failed;
                drop(inner);
                // Bring the removed sibling functions back so the card
                // stays usable in its old image.
                if let Err(rescan_err) = self.bus().rescan_bus(self.bridge()) {
                    warn!("restore rescan after failed teardown also failed: {rescan_err}");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.bus().disable_link(self.bridge()) {
            inner.state = ReloadState::Failed;
            return Err(FpgahpError::Link(format!(
                "failed to disable link on {}: {e}",
                self.bridge()
            )));
        }

        // Detachment unbinds drivers synchronously and those re-enter the
        // registry; the manager lock must be released first.
        drop(inner);
        self.bus().detach_subordinate_devices(self.bridge());

        // The BMC gives no completion signal. Wait out the settle time it
        // quoted with the link held down.
        debug!("waiting {settle:?} for the new image to settle");
        thread::sleep(settle);

        let mut inner = self.manager().lock();
        if let Err(e) = self.bring_up_link() {
            inner.state = ReloadState::Failed;
            return Err(e);
        }
        // Terminal state is committed before the rescan so a rescan failure
        // cannot mask a completed reload.
        inner.state = ReloadState::Done;
        drop(inner);

        match self.bus().rescan_bus(self.bridge()) {
            Ok(RescanOutcome::Configured) => {
                info!("image '{image}' loaded on slot {}", self.slot().name());
                Ok(())
            }
            Ok(RescanOutcome::AlreadyPresent) => {
                warn!(
                    "devices below {} were already present after reload",
                    self.bridge()
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the card's sibling functions, run the card's prepare callback
    /// and fire the BMC trigger. Returns the settle time the trigger quoted.
    ///
    /// The anchor function is kept: the trigger path runs through it.
    fn tear_down_card(
        &self,
        device: &Path,
        ops: &Arc<dyn ManagerOps>,
        trigger_ops: &Arc<dyn TriggerOps>,
        image: &str,
    ) -> Result<Duration, FpgahpError> {
        let siblings = self.bus().sibling_functions(device)?;
        for function in siblings.iter().rev() {
            if function.as_path() == device {
                continue;
            }
            self.bus().remove_device(function)?;
        }
        ops.prepare()
            .map_err(|e| FpgahpError::Prepare(e.to_string()))?;
        trigger_ops
            .image_trigger(image.as_bytes())
            .map_err(|e| FpgahpError::Trigger(e.to_string()))
    }

    /// Re-enable the link, confirm training completed and check the slot for
    /// a latched power fault.
    fn bring_up_link(&self) -> Result<(), FpgahpError> {
        self.bus().enable_link(self.bridge()).map_err(|e| {
            FpgahpError::Link(format!("failed to re-enable link on {}: {e}", self.bridge()))
        })?;
        self.bus().check_link_status(self.bridge())?;
        if self.bus().query_power_fault(self.bridge()) {
            return Err(FpgahpError::PowerFault(self.slot().name().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotplug::registry::Registry;
    use crate::hotplug::testing::{MockBus, MockTrigger, RecordingOps};
    use crate::pci::BridgeAddress;
    use googletest::prelude::*;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    struct Rig {
        bus: Arc<MockBus>,
        registry: Arc<Registry>,
        controller: Arc<Controller>,
        ops: Arc<RecordingOps>,
        trigger: Arc<MockTrigger>,
    }

    fn card_device() -> PathBuf {
        PathBuf::from("/sys/devices/pci0000:3a/0000:3a:00.0/0000:3b:00.0")
    }

    fn rig() -> Rig {
        let bus = Arc::new(MockBus::new());
        let registry = Arc::new(Registry::new(bus.clone()));
        let bridge = BridgeAddress::new("0000:3a:00.0").unwrap();
        let ops = Arc::new(RecordingOps::new(bus.log.clone()));
        let controller = registry
            .register(&bridge, &card_device(), "n6000", ops.clone())
            .unwrap();
        let trigger = Arc::new(MockTrigger::new(bus.log.clone()));
        let bmc = card_device().join("spi1.0/n6000bmc-sec-update.0");
        registry.register_trigger(&bmc, trigger.clone()).unwrap();
        Rig {
            bus,
            registry,
            controller,
            ops,
            trigger,
        }
    }

    fn full_protocol_events() -> Vec<String> {
        [
            "power_resume",
            "remove 0000:3b:00.1",
            "prepare",
            "trigger user1",
            "disable_link",
            "detach",
            "enable_link",
            "check_link",
            "query_power_fault",
            "rescan",
            "power_suspend",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[gtest]
    fn successful_reload_runs_protocol_in_order() {
        let r = rig();
        *r.bus.siblings.lock().unwrap() = vec![card_device(), card_device().with_file_name("0000:3b:00.1")];

        let result = r.controller.image_load("user1");

        assert_that!(result, ok(eq(&())));
        assert_that!(r.controller.manager().state(), eq(ReloadState::Done));
        assert_that!(r.bus.events(), eq(&full_protocol_events()));
    }

    #[gtest]
    fn sibling_functions_removed_in_reverse_order_anchor_kept() {
        let r = rig();
        *r.bus.siblings.lock().unwrap() = vec![
            card_device(),
            card_device().with_file_name("0000:3b:00.1"),
            card_device().with_file_name("0000:3b:00.2"),
        ];

        r.controller.image_load("user1").unwrap();

        let events = r.bus.events();
        let removes: Vec<&String> = events.iter().filter(|e| e.starts_with("remove")).collect();
        assert_that!(
            removes,
            eq(&vec![&"remove 0000:3b:00.2".to_string(), &"remove 0000:3b:00.1".to_string()])
        );
    }

    #[gtest]
    fn empty_selector_is_rejected_without_side_effects() {
        let r = rig();
        let result = r.controller.image_load("");
        assert_that!(result, err(displays_as(contains_substring("empty image"))));
        assert_that!(r.bus.events().len(), eq(0));
        assert_that!(r.controller.manager().state(), eq(ReloadState::Unknown));
    }

    #[gtest]
    fn missing_trigger_fails_precondition_without_side_effects() {
        let bus = Arc::new(MockBus::new());
        let registry = Registry::new(bus.clone());
        let bridge = BridgeAddress::new("0000:3a:00.0").unwrap();
        let controller = registry
            .register(
                &bridge,
                &card_device(),
                "n6000",
                Arc::new(RecordingOps::new(bus.log.clone())),
            )
            .unwrap();

        let result = controller.image_load("user1");

        assert_that!(
            result,
            err(displays_as(contains_substring("no BMC reload agent")))
        );
        assert_that!(bus.events().len(), eq(0));
        assert_that!(controller.manager().state(), eq(ReloadState::Unknown));
    }

    #[gtest]
    fn prepare_failure_marks_failed_and_restores_functions() {
        let r = rig();
        r.ops.fail.store(true, Ordering::Relaxed);

        let result = r.controller.image_load("user1");

        assert_that!(
            result,
            err(displays_as(contains_substring("Reload prepare callback failed")))
        );
        assert_that!(r.controller.manager().state(), eq(ReloadState::Failed));
        let events = r.bus.events();
        // The restore rescan runs, the link is never touched.
        assert_that!(events.contains(&"rescan".to_string()), eq(true));
        assert_that!(events.contains(&"disable_link".to_string()), eq(false));
        assert_that!(events.last(), some(eq(&"power_suspend".to_string())));
    }

    #[gtest]
    fn trigger_failure_marks_failed_and_restores_functions() {
        let r = rig();
        r.trigger.fail.store(true, Ordering::Relaxed);

        let result = r.controller.image_load("user1");

        assert_that!(
            result,
            err(displays_as(contains_substring("BMC image trigger failed")))
        );
        assert_that!(r.controller.manager().state(), eq(ReloadState::Failed));
        let events = r.bus.events();
        assert_that!(events.contains(&"rescan".to_string()), eq(true));
        assert_that!(events.contains(&"disable_link".to_string()), eq(false));
    }

    #[gtest]
    fn enable_link_failure_marks_failed() {
        let r = rig();
        r.bus.fail_enable_link.store(true, Ordering::Relaxed);

        let result = r.controller.image_load("user1");

        assert_that!(
            result,
            err(displays_as(contains_substring("failed to re-enable link")))
        );
        assert_that!(r.controller.manager().state(), eq(ReloadState::Failed));
    }

    #[gtest]
    fn link_training_failure_marks_failed_without_rescan() {
        let r = rig();
        r.bus.fail_link_status.store(true, Ordering::Relaxed);

        let result = r.controller.image_load("user1");

        assert_that!(
            result,
            err(displays_as(contains_substring("link training did not complete")))
        );
        assert_that!(r.controller.manager().state(), eq(ReloadState::Failed));
        let events = r.bus.events();
        assert_that!(events.contains(&"rescan".to_string()), eq(false));
        assert_that!(events.last(), some(eq(&"power_suspend".to_string())));
    }

    #[gtest]
    fn power_fault_after_reload_marks_failed() {
        let r = rig();
        r.bus.power_fault.store(true, Ordering::Relaxed);

        let result = r.controller.image_load("user1");

        assert_that!(result, err(displays_as(contains_substring("Power fault"))));
        assert_that!(r.controller.manager().state(), eq(ReloadState::Failed));
    }

    #[gtest]
    fn rescan_failure_does_not_reverse_done_state() {
        let r = rig();
        r.bus.fail_rescan.store(true, Ordering::Relaxed);

        let result = r.controller.image_load("user1");

        assert_that!(
            result,
            err(displays_as(contains_substring("re-enumeration failed")))
        );
        assert_that!(r.controller.manager().state(), eq(ReloadState::Done));
    }

    #[gtest]
    fn already_present_rescan_is_tolerated() {
        let r = rig();
        r.bus.rescan_already_present.store(true, Ordering::Relaxed);

        let result = r.controller.image_load("user1");

        assert_that!(result, ok(eq(&())));
        assert_that!(r.controller.manager().state(), eq(ReloadState::Done));
    }

    #[gtest]
    fn detached_driver_can_reenter_unregister() {
        let r = rig();
        let registry = r.registry.clone();
        let controller = r.controller.clone();
        *r.bus.on_detach.lock().unwrap() =
            Some(Box::new(move || registry.unregister(&controller)));

        let result = r.controller.image_load("user1");

        // The reload commits its terminal state even though its own
        // detachment unregistered the card.
        assert_that!(result, ok(eq(&())));
        assert_that!(r.controller.manager().state(), eq(ReloadState::Done));
        assert_that!(r.controller.manager().is_registered(), eq(false));
    }

    #[gtest]
    fn concurrent_reloads_do_not_interleave() {
        let bus = Arc::new(MockBus::new());
        let registry = Arc::new(Registry::new(bus.clone()));
        let bridge = BridgeAddress::new("0000:3a:00.0").unwrap();
        let controller = registry
            .register(
                &bridge,
                &card_device(),
                "n6000",
                Arc::new(RecordingOps::new(bus.log.clone())),
            )
            .unwrap();
        *bus.siblings.lock().unwrap() =
            vec![card_device(), card_device().with_file_name("0000:3b:00.1")];
        let mut trigger = MockTrigger::new(bus.log.clone());
        trigger.trigger_delay = Duration::from_millis(50);
        let bmc = card_device().join("spi1.0/n6000bmc-sec-update.0");
        registry.register_trigger(&bmc, Arc::new(trigger)).unwrap();

        let results = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let controller = controller.clone();
                let results = results.clone();
                thread::spawn(move || {
                    let r = controller.image_load("user1");
                    results.lock().unwrap().push(r);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for result in results.lock().unwrap().drain(..) {
            assert_that!(result, ok(eq(&())));
        }
        let events = bus.events();
        let expected = full_protocol_events();
        assert_that!(events.len(), eq(2 * expected.len()));
        assert_that!(&events[..expected.len()], eq(expected.as_slice()));
        assert_that!(&events[expected.len()..], eq(expected.as_slice()));
    }

    #[gtest]
    fn available_images_lists_bmc_images() {
        let r = rig();
        let images = r.controller.available_images();
        assert_that!(images, ok(eq(&"factory\nuser1\nuser2".to_string())));
    }

    #[gtest]
    fn available_images_requires_registered_trigger() {
        let r = rig();
        r.registry.unregister_trigger(&r.controller);
        let result = r.controller.available_images();
        assert_that!(
            result,
            err(displays_as(contains_substring("no BMC reload agent")))
        );
    }
}
