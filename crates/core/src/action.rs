//! Action types for the device state machines.

use crate::{Event, StateLevel};
use std::time::Duration;

/// Actions a device state machine wants performed.
///
/// Actions are **commands** - they describe something to do. The runner
/// executes actions and converts their outcomes back into events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Arm the single-shot timer of one state level.
    ///
    /// Re-arming an already armed level cancels the previous firing; at
    /// most one timer is pending per level. Expiry is delivered as
    /// `Event::StateTimeout` for the arming level.
    SetTimer { level: StateLevel, duration: Duration },

    /// Cancel the timer of one state level, if armed.
    CancelTimer { level: StateLevel },

    /// Enqueue an event onto this device's mailbox.
    ///
    /// Used for the asynchronous `StateEnter` half of a transition,
    /// synthesized `Awake` ticks, binding table cursor advances and DDF
    /// match requests. Mailbox order per device is preserved.
    EnqueueInternal { event: Event },
}

impl Action {
    /// Get the action type name for logging and stats.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
        }
    }
}
