//! Item-change sweep: the write/actuation counterpart to polling.
//!
//! Invoked by the idle state before the sub-machines run. Pending state
//! changes recorded by the resource layer are verified against the changed
//! item, ticked, and garbage-collected per sub-device.

use crate::state::Device;
use std::sync::Arc;
use zigbridge_core::{Event, StateMachine};
use zigbridge_types::SubDevice;

impl Device {
    /// Drive the pending state changes of the affected sub-devices.
    ///
    /// `Poll` and `Awake` sweep every sub-device; an item change sweeps
    /// only the sub-device it originated from. Other events touch nothing.
    pub(crate) fn check_item_changes(&mut self, event: &Event) {
        let subs: Vec<Arc<SubDevice>> = match event {
            Event::Poll | Event::Awake => self.sub_devices(),
            Event::ItemChanged { prefix, id, .. } => self
                .services()
                .resources
                .resource(*prefix, id)
                .into_iter()
                .collect(),
            _ => return,
        };

        for sub in subs {
            if !sub.has_state_changes() {
                continue;
            }

            let changed_item = match event {
                Event::ItemChanged { suffix, .. } => sub.item(suffix),
                _ => None,
            };

            sub.process_state_changes(changed_item.as_ref(), &*self.services().aps, self.now());
            sub.cleanup_state_changes();
        }
    }
}
