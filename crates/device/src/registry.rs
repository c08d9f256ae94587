//! Process-wide device registry.

use crate::state::{Device, Services};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use zigbridge_core::{Action, Event, StateMachine};
use zigbridge_types::DeviceKey;

/// The mapping from [`DeviceKey`] to [`Device`].
///
/// Holds at most one device per key. Devices are created on demand when a
/// lower layer announces a key; removal detaches the device's sub-devices
/// without destroying them.
pub struct DeviceRegistry {
    devices: HashMap<DeviceKey, Device>,
    services: Arc<Services>,
    /// Process-wide gate for the new control path, captured once at
    /// startup. Devices created while unset stay on legacy handling.
    managed: bool,
}

impl DeviceRegistry {
    pub fn new(services: Arc<Services>, managed: bool) -> Self {
        Self {
            devices: HashMap::new(),
            services,
            managed,
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Return the existing device or construct a new one in Init state.
    ///
    /// For a new device the returned actions carry its initial enter
    /// event; the caller feeds them back into the mailbox.
    pub fn get_or_create(&mut self, key: DeviceKey) -> (&mut Device, Vec<Action>) {
        let mut actions = Vec::new();

        let device = self.devices.entry(key).or_insert_with(|| {
            debug!(key = %key, "creating device");
            let mut device = Device::new(key, Arc::clone(&self.services), self.managed);
            device.start(&mut actions);
            device
        });

        (device, actions)
    }

    pub fn get(&self, key: DeviceKey) -> Option<&Device> {
        self.devices.get(&key)
    }

    pub fn get_mut(&mut self, key: DeviceKey) -> Option<&mut Device> {
        self.devices.get_mut(&key)
    }

    /// Destroy the device, detaching its sub-devices first.
    pub fn remove(&mut self, key: DeviceKey) -> bool {
        match self.devices.remove(&key) {
            Some(mut device) => {
                device.detach_sub_devices();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = DeviceKey> + '_ {
        self.devices.keys().copied()
    }

    /// Deliver one event to one device.
    ///
    /// Unknown keys are ignored; devices outside the managed control path
    /// are skipped entirely.
    pub fn dispatch(&mut self, key: DeviceKey, event: &Event, now: Duration) -> Vec<Action> {
        let Some(device) = self.devices.get_mut(&key) else {
            return Vec::new();
        };
        if !device.managed() {
            return Vec::new();
        }

        device.set_time(now);
        device.handle(event)
    }
}
