//! Event types for the device state machines.

use zigbridge_types::ResourcePrefix;

/// Number of parallel state machine levels per device.
pub const STATE_LEVEL_COUNT: usize = 3;

/// The three state machine levels of a device.
///
/// Level 0 is the top-level machine; the binding and poll sub-machines run
/// in parallel while the top level is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StateLevel {
    /// Top-level state machine (Init … Idle / Dead).
    Top = 0,
    /// Binding table verification sub-machine.
    Binding = 1,
    /// Attribute polling sub-machine.
    Poll = 2,
}

impl StateLevel {
    /// Slot index into the per-device handler array.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// All possible events a device can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions. The target
/// device key travels alongside the event in the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Dispatcher events (carry their target level)
    // ═══════════════════════════════════════════════════════════════════════
    /// A state was entered. Dispatched through the mailbox so the outgoing
    /// handler finished unwinding before the new handler runs.
    StateEnter { level: StateLevel },

    /// A state is being left. Delivered synchronously during a transition.
    StateLeave { level: StateLevel },

    /// The single-shot timer armed by this level expired.
    StateTimeout { level: StateLevel },

    // ═══════════════════════════════════════════════════════════════════════
    // Scheduling
    // ═══════════════════════════════════════════════════════════════════════
    /// Periodic poll tick for this device.
    Poll,

    /// The device's sleep/wake rendezvous: it is listening right now.
    Awake,

    // ═══════════════════════════════════════════════════════════════════════
    // APS / ZDP
    // ═══════════════════════════════════════════════════════════════════════
    /// The APS controller confirmed an earlier request.
    ApsConfirm { request_id: u8, status: u8 },

    /// The node's ZDP node descriptor arrived.
    NodeDescriptor,

    /// The node's ZDP active endpoint list arrived.
    ActiveEndpoints,

    /// A ZDP simple descriptor arrived.
    SimpleDescriptor,

    /// ZDP status of a prior Mgmt_Bind_req.
    BindingTable { status: u8 },

    /// Cursor advance of the binding table verification walk.
    BindingTick,

    // ═══════════════════════════════════════════════════════════════════════
    // Device description files
    // ═══════════════════════════════════════════════════════════════════════
    /// Ask the DDF engine to match a description for this device.
    DdfInitRequest,

    /// Verdict of the DDF engine; `matched == false` means no description.
    DdfInitResponse { matched: bool },

    /// A DDF file changed on disk; descriptions must be re-evaluated.
    DdfReload,

    // ═══════════════════════════════════════════════════════════════════════
    // Resource notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// An attribute item of a resource changed, keyed by its suffix.
    ItemChanged {
        prefix: ResourcePrefix,
        id: String,
        suffix: String,
    },
}

impl Event {
    /// The target level of a dispatcher event, if it carries one.
    pub fn level(&self) -> Option<StateLevel> {
        match self {
            Event::StateEnter { level }
            | Event::StateLeave { level }
            | Event::StateTimeout { level } => Some(*level),
            _ => None,
        }
    }

    /// Get the event type name for logging and stats.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::StateEnter { .. } => "StateEnter",
            Event::StateLeave { .. } => "StateLeave",
            Event::StateTimeout { .. } => "StateTimeout",
            Event::Poll => "Poll",
            Event::Awake => "Awake",
            Event::ApsConfirm { .. } => "ApsConfirm",
            Event::NodeDescriptor => "NodeDescriptor",
            Event::ActiveEndpoints => "ActiveEndpoints",
            Event::SimpleDescriptor => "SimpleDescriptor",
            Event::BindingTable { .. } => "BindingTable",
            Event::BindingTick => "BindingTick",
            Event::DdfInitRequest => "DdfInitRequest",
            Event::DdfInitResponse { .. } => "DdfInitResponse",
            Event::DdfReload => "DdfReload",
            Event::ItemChanged { .. } => "ItemChanged",
        }
    }
}
