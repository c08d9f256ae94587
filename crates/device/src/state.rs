//! Device state machine.

use crate::binding::BindingContext;
use crate::poll::PollItem;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zigbridge_core::{Action, Event, StateLevel, StateMachine, STATE_LEVEL_COUNT};
use zigbridge_types::{
    item, ApsController, ApsResult, DdfResolver, DeviceKey, Node, NodeRegistry, ResourceItem,
    ResourcePrefix, ResourceStore, SimpleDescriptor, SubDevice, Value, ZclReadReq, APS_SUCCESS,
    ATTR_ID_MANUFACTURER_NAME, ATTR_ID_MODEL_ID, BASIC_CLUSTER_ID, MIN_MAC_POLL_RX_ON,
};

/// Shared collaborators injected into every device.
///
/// All of them are used only from the event thread; answers that arrive
/// asynchronously (APS confirms, ZDP responses, DDF match verdicts) come
/// back through the event mailbox.
pub struct Services {
    pub aps: Arc<dyn ApsController>,
    pub nodes: Arc<dyn NodeRegistry>,
    pub resources: Arc<dyn ResourceStore>,
    pub ddf: Arc<dyn DdfResolver>,
}

/// All states of the three-level device state machine.
///
/// Each state belongs to exactly one [`StateLevel`]; the handler slots of a
/// device hold at most one state per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    // ═══════════════════════════════════════════════════════════════════════
    // Level 0
    // ═══════════════════════════════════════════════════════════════════════
    /// Entry point; concentrates all verification progress decisions.
    Init,
    /// ZDP verification: node descriptor present.
    NodeDescriptor,
    /// ZDP verification: active endpoint list present.
    ActiveEndpoints,
    /// ZDP verification: all simple descriptors fetched.
    SimpleDescriptor,
    /// Read Basic cluster attributes needed to match a DDF.
    BasicCluster,
    /// Await the asynchronous DDF match verdict.
    GetDeviceDescription,
    /// Operational; runs the binding and poll sub-machines in parallel.
    Idle,
    /// Terminal; the device consumes no further resources.
    Dead,

    // ═══════════════════════════════════════════════════════════════════════
    // Level 1
    // ═══════════════════════════════════════════════════════════════════════
    /// Wait for the next binding verification window.
    BindingIdle,
    /// Walk the node's binding table one entry per tick.
    BindingTableVerify,

    // ═══════════════════════════════════════════════════════════════════════
    // Level 2
    // ═══════════════════════════════════════════════════════════════════════
    /// Wait for a poll tick, then collect stale items.
    PollIdle,
    /// Pick the next poll item and issue its read.
    PollNext,
    /// Wait for the APS confirm of an in-flight read.
    PollBusy,
}

impl DeviceState {
    /// The level whose handler slot this state occupies.
    pub fn level(&self) -> StateLevel {
        match self {
            DeviceState::Init
            | DeviceState::NodeDescriptor
            | DeviceState::ActiveEndpoints
            | DeviceState::SimpleDescriptor
            | DeviceState::BasicCluster
            | DeviceState::GetDeviceDescription
            | DeviceState::Idle
            | DeviceState::Dead => StateLevel::Top,
            DeviceState::BindingIdle | DeviceState::BindingTableVerify => StateLevel::Binding,
            DeviceState::PollIdle | DeviceState::PollNext | DeviceState::PollBusy => {
                StateLevel::Poll
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceState::Init => "Init",
            DeviceState::NodeDescriptor => "NodeDescriptor",
            DeviceState::ActiveEndpoints => "ActiveEndpoints",
            DeviceState::SimpleDescriptor => "SimpleDescriptor",
            DeviceState::BasicCluster => "BasicCluster",
            DeviceState::GetDeviceDescription => "GetDeviceDescription",
            DeviceState::Idle => "Idle",
            DeviceState::Dead => "Dead",
            DeviceState::BindingIdle => "BindingIdle",
            DeviceState::BindingTableVerify => "BindingTableVerify",
            DeviceState::PollIdle => "PollIdle",
            DeviceState::PollNext => "PollNext",
            DeviceState::PollBusy => "PollBusy",
        }
    }
}

/// Per-device state machine.
///
/// # State Machine Flow
///
/// 1. **Init** → resolve the node, elide coordinator and Green Power keys
/// 2. **ZDP verification** → node descriptor, endpoints, simple descriptors
/// 3. **BasicCluster** → manufacturer name and model id for DDF matching
/// 4. **GetDeviceDescription** → async DDF verdict decides Idle or Dead
/// 5. **Idle** → binding and poll sub-machines run in parallel
///
/// Every failure during verification funnels back through Init; the next
/// `Poll`/`Awake` tick re-evaluates progress from there.
pub struct Device {
    /// Identity; for physical devices the IEEE MAC address.
    key: DeviceKey,

    /// Injected collaborators.
    services: Arc<Services>,

    /// Gate for the new control path; unmanaged devices stay on legacy
    /// handling and are skipped by the registry.
    managed: bool,

    /// Lazy handle into the core node registry.
    node: Option<Arc<Node>>,

    /// Attribute items owned by the device itself.
    items: Vec<ResourceItem>,

    /// `(unique id, prefix)` pairs used to resolve live sub-device handles
    /// on demand. Never cached as pointers since sub-device lifetime is
    /// controlled elsewhere.
    sub_devices: Vec<(String, ResourcePrefix)>,

    /// Currently installed handler per level. Levels 1 and 2 are occupied
    /// exactly while level 0 is `Idle`.
    state: [Option<DeviceState>; STATE_LEVEL_COUNT],

    /// When the device last announced it is listening.
    awake: Option<Duration>,

    /// Binding sub-machine context.
    pub(crate) binding: BindingContext,

    /// Queue of items to poll, consumed from the back.
    pub(crate) poll_items: Vec<PollItem>,

    /// In-flight ZDP request, compared against incoming confirms.
    pub(crate) pending_zdp: ApsResult,

    /// In-flight ZCL read, compared against incoming confirms.
    pub(crate) pending_read: ApsResult,

    /// Current time (set by runner before each handle call).
    now: Duration,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("key", &self.key.to_string())
            .field("state", &self.state)
            .field("managed", &self.managed)
            .field("poll_items", &self.poll_items.len())
            .field("now", &self.now)
            .finish()
    }
}

impl Device {
    /// Create a new device in no state. The registry moves it into `Init`
    /// via [`Device::start`] right after insertion.
    pub(crate) fn new(key: DeviceKey, services: Arc<Services>, managed: bool) -> Self {
        let mut items = vec![
            ResourceItem::new(item::STATE_REACHABLE),
            ResourceItem::new(item::ATTR_SLEEPER),
            ResourceItem::new(item::ATTR_EXT_ADDRESS),
            ResourceItem::new(item::ATTR_NWK_ADDRESS),
            ResourceItem::new(item::ATTR_UNIQUE_ID),
            ResourceItem::new(item::ATTR_MANUFACTURER_NAME),
            ResourceItem::new(item::ATTR_MODEL_ID),
        ];
        if let Some(uid) = items.iter_mut().find(|i| i.suffix() == item::ATTR_UNIQUE_ID) {
            uid.set_value(Value::Str(key.unique_id()), Duration::ZERO);
        }

        Self {
            key,
            services,
            managed,
            node: None,
            items,
            sub_devices: Vec::new(),
            state: [None; STATE_LEVEL_COUNT],
            awake: None,
            binding: BindingContext::default(),
            poll_items: Vec::new(),
            pending_zdp: ApsResult::default(),
            pending_read: ApsResult::default(),
            now: Duration::ZERO,
        }
    }

    /// Install the initial state and enqueue its enter event.
    pub(crate) fn start(&mut self, actions: &mut Vec<Action>) {
        self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn managed(&self) -> bool {
        self.managed
    }

    /// The state installed at one level, if any.
    pub fn state(&self, level: StateLevel) -> Option<DeviceState> {
        self.state[level.index()]
    }

    pub fn node(&self) -> Option<&Arc<Node>> {
        self.node.as_ref()
    }

    pub fn poll_queue_len(&self) -> usize {
        self.poll_items.len()
    }

    /// Retry count of the poll queue's head, if any.
    pub fn poll_head_retry(&self) -> Option<usize> {
        self.poll_items.last().map(|p| p.retry)
    }

    pub fn item(&self, suffix: &str) -> Option<&ResourceItem> {
        self.items.iter().find(|i| i.suffix() == suffix)
    }

    pub(crate) fn item_mut(&mut self, suffix: &str) -> Option<&mut ResourceItem> {
        self.items.iter_mut().find(|i| i.suffix() == suffix)
    }

    /// Set a device-owned item, stamping `last_set` with the current time.
    pub fn set_item_value(&mut self, suffix: &str, value: Value) -> bool {
        let now = self.now;
        match self.item_mut(suffix) {
            Some(item) => item.set_value(value, now),
            None => false,
        }
    }

    pub(crate) fn item_bool(&self, suffix: &str) -> bool {
        self.item(suffix).map(ResourceItem::to_bool).unwrap_or(false)
    }

    pub(crate) fn item_u64(&self, suffix: &str) -> u64 {
        self.item(suffix).map(ResourceItem::to_u64).unwrap_or(0)
    }

    /// Register a sub-device by identity; the live handle stays with the
    /// resource store.
    pub fn add_sub_device(&mut self, sub: &SubDevice) {
        sub.set_parent(Some(self.key));
        if self.sub_devices.iter().any(|(uid, _)| uid == sub.unique_id()) {
            return;
        }
        self.sub_devices
            .push((sub.unique_id().to_string(), sub.prefix()));
    }

    /// Resolve all live sub-device handles through the resource store.
    pub fn sub_devices(&self) -> Vec<Arc<SubDevice>> {
        self.sub_devices
            .iter()
            .filter_map(|(uid, prefix)| self.services.resources.resource(*prefix, uid))
            .collect()
    }

    /// Identities of the registered sub-devices.
    pub fn sub_device_ids(&self) -> &[(String, ResourcePrefix)] {
        &self.sub_devices
    }

    /// Detach all sub-devices without destroying them. Called when the
    /// device is removed from the registry.
    pub(crate) fn detach_sub_devices(&mut self) {
        for (uid, prefix) in &self.sub_devices {
            if let Some(sub) = self.services.resources.resource(*prefix, uid) {
                sub.set_parent(None);
            }
        }
    }

    pub(crate) fn services(&self) -> &Services {
        &self.services
    }

    /// A device is reachable while its last `Awake` is fresh, or when it is
    /// mains-powered or marked non-sleeper and the stored verdict is set.
    pub fn reachable(&self) -> bool {
        if let Some(awake) = self.awake {
            if self.now.saturating_sub(awake) < MIN_MAC_POLL_RX_ON {
                return true;
            }
        }
        if let Some(node) = &self.node {
            if let Some(descriptor) = node.node_descriptor() {
                if descriptor.receiver_on_when_idle {
                    return self.item_bool(item::STATE_REACHABLE);
                }
            }
        }
        if !self.item_bool(item::ATTR_SLEEPER) {
            return self.item_bool(item::STATE_REACHABLE);
        }
        false
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Dispatcher
    // ═══════════════════════════════════════════════════════════════════════

    /// Deliver an event to the handler slot of one level.
    ///
    /// `StateEnter` and `StateLeave` carry their target level and go to
    /// that slot regardless of `level`; all other events go to the slot
    /// matching `level`. `Awake` at level 0 refreshes the awake timestamp
    /// before dispatch.
    pub fn handle_event(&mut self, event: &Event, level: StateLevel, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { level: target } | Event::StateLeave { level: target } => {
                if let Some(state) = self.state[target.index()] {
                    self.run_state(state, event, actions);
                }
            }
            _ => {
                if let Some(state) = self.state[level.index()] {
                    if matches!(event, Event::Awake) && level == StateLevel::Top {
                        self.awake = Some(self.now);
                    }
                    self.run_state(state, event, actions);
                }
            }
        }
    }

    /// Sole mutator of the handler slots.
    ///
    /// A no-op when the state does not change: states never re-enter
    /// themselves without an explicit leave. Otherwise the outgoing state
    /// receives `StateLeave` synchronously, the slot is updated, and the
    /// incoming state is entered asynchronously through the mailbox so the
    /// outgoing handler can finish unwinding first.
    pub(crate) fn set_state(
        &mut self,
        new: Option<DeviceState>,
        level: StateLevel,
        actions: &mut Vec<Action>,
    ) {
        debug_assert!(new.map_or(true, |s| s.level() == level));

        if self.state[level.index()] == new {
            return;
        }

        if let Some(old) = self.state[level.index()] {
            self.run_state(old, &Event::StateLeave { level }, actions);
        }

        self.state[level.index()] = new;

        if let Some(state) = new {
            debug!(key = %self.key, state = state.name(), ?level, "state transition");
            actions.push(Action::EnqueueInternal {
                event: Event::StateEnter { level },
            });
        }
    }

    fn run_state(&mut self, state: DeviceState, event: &Event, actions: &mut Vec<Action>) {
        match state {
            DeviceState::Init => self.init_state(event, actions),
            DeviceState::NodeDescriptor => self.node_descriptor_state(event, actions),
            DeviceState::ActiveEndpoints => self.active_endpoints_state(event, actions),
            DeviceState::SimpleDescriptor => self.simple_descriptor_state(event, actions),
            DeviceState::BasicCluster => self.basic_cluster_state(event, actions),
            DeviceState::GetDeviceDescription => self.get_device_description_state(event, actions),
            DeviceState::Idle => self.idle_state(event, actions),
            DeviceState::Dead => self.dead_state(event, actions),
            DeviceState::BindingIdle => self.binding_idle_state(event, actions),
            DeviceState::BindingTableVerify => self.binding_table_verify_state(event, actions),
            DeviceState::PollIdle => self.poll_idle_state(event, actions),
            DeviceState::PollNext => self.poll_next_state(event, actions),
            DeviceState::PollBusy => self.poll_busy_state(event, actions),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Level 0: verification chain
    // ═══════════════════════════════════════════════════════════════════════

    /// #1 Entry point. Resolves the node, elides the coordinator and Green
    /// Power devices, and jumps to verification once a node shows up.
    fn init_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                self.pending_zdp = ApsResult::default();
                self.pending_read = ApsResult::default();

                if self.node.is_none() {
                    self.node = self.services.nodes.get_node(self.key);
                }
                if let Some(node) = &self.node {
                    if node.nwk_address() == 0x0000 {
                        // the coordinator needs no verification
                        self.set_state(Some(DeviceState::Dead), StateLevel::Top, actions);
                        return;
                    }
                } else if self.key.is_green_power() {
                    self.set_state(Some(DeviceState::Dead), StateLevel::Top, actions);
                }
            }
            Event::Poll
            | Event::Awake
            | Event::StateTimeout { .. } => {
                self.init_progress(actions);
            }
            Event::ItemChanged { suffix, .. }
                if suffix == item::STATE_REACHABLE
                    || suffix == item::CONFIG_REACHABLE
                    || suffix == item::STATE_LAST_UPDATED =>
            {
                self.init_progress(actions);
            }
            _ => {}
        }
    }

    /// Lazy-resolve the node and move on to verification when it exists.
    fn init_progress(&mut self, actions: &mut Vec<Action>) {
        if self.node.is_none() {
            self.node = self.services.nodes.get_node(self.key);
        }

        match self.node.clone() {
            Some(node) => {
                let now = self.now;
                if let Some(ditem) = self.item_mut(item::ATTR_EXT_ADDRESS) {
                    ditem.set_value(Value::U64(node.ext_address()), now);
                }
                if let Some(ditem) = self.item_mut(item::ATTR_NWK_ADDRESS) {
                    ditem.set_value(Value::U64(u64::from(node.nwk_address())), now);
                }

                if node.node_descriptor().is_some() || self.reachable() {
                    self.set_state(Some(DeviceState::NodeDescriptor), StateLevel::Top, actions);
                }
            }
            None => {
                debug!(key = %self.key, "init: no node found");
            }
        }
    }

    /// #2 Checks that a valid node descriptor is available.
    fn node_descriptor_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                let Some(node) = self.node.clone() else {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                    return;
                };

                if node.node_descriptor().is_some() {
                    info!(key = %self.key, "ZDP node descriptor verified");
                    self.set_state(Some(DeviceState::ActiveEndpoints), StateLevel::Top, actions);
                } else if !self.reachable() {
                    // can't be queried, go back to init
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                } else {
                    self.pending_zdp = self
                        .services
                        .aps
                        .zdp_node_descriptor_req(node.nwk_address());
                    if self.pending_zdp.enqueued {
                        actions.push(Action::SetTimer {
                            level: StateLevel::Top,
                            duration: MIN_MAC_POLL_RX_ON,
                        });
                    } else {
                        self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                    }
                }
            }
            Event::ApsConfirm { request_id, status } => {
                if self.zdp_confirm_failed(*request_id, *status) {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                }
            }
            Event::NodeDescriptor => {
                actions.push(Action::CancelTimer {
                    level: StateLevel::Top,
                });
                // evaluate again from init, driven by a fresh awake tick
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                actions.push(Action::EnqueueInternal {
                    event: Event::Awake,
                });
            }
            Event::StateTimeout { .. } => {
                info!(key = %self.key, "read ZDP node descriptor timeout");
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
            }
            _ => {}
        }
    }

    /// #3 Checks that the active endpoint list is known.
    fn active_endpoints_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                let Some(node) = self.node.clone() else {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                    return;
                };

                if !node.endpoints().is_empty() {
                    info!(key = %self.key, "ZDP active endpoints verified");
                    self.set_state(Some(DeviceState::SimpleDescriptor), StateLevel::Top, actions);
                } else if !self.reachable() {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                } else {
                    self.pending_zdp = self
                        .services
                        .aps
                        .zdp_active_endpoints_req(node.nwk_address());
                    if self.pending_zdp.enqueued {
                        actions.push(Action::SetTimer {
                            level: StateLevel::Top,
                            duration: MIN_MAC_POLL_RX_ON,
                        });
                    } else {
                        self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                    }
                }
            }
            Event::ApsConfirm { request_id, status } => {
                if self.zdp_confirm_failed(*request_id, *status) {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                }
            }
            Event::ActiveEndpoints => {
                actions.push(Action::CancelTimer {
                    level: StateLevel::Top,
                });
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                actions.push(Action::EnqueueInternal {
                    event: Event::Awake,
                });
            }
            Event::StateTimeout { .. } => {
                info!(key = %self.key, "read ZDP active endpoints timeout");
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
            }
            _ => {}
        }
    }

    /// #4 Checks that simple descriptors are known for all endpoints.
    fn simple_descriptor_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                let Some(node) = self.node.clone() else {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                    return;
                };

                let need_fetch = node.endpoints().into_iter().find(|ep| {
                    node.simple_descriptor(*ep).map_or(true, |sd| !sd.is_valid())
                });

                match need_fetch {
                    None => {
                        info!(key = %self.key, "ZDP simple descriptors verified");
                        self.set_state(Some(DeviceState::BasicCluster), StateLevel::Top, actions);
                    }
                    Some(endpoint) => {
                        if !self.reachable() {
                            self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                            return;
                        }
                        self.pending_zdp = self
                            .services
                            .aps
                            .zdp_simple_descriptor_req(node.nwk_address(), endpoint);
                        if self.pending_zdp.enqueued {
                            actions.push(Action::SetTimer {
                                level: StateLevel::Top,
                                duration: MIN_MAC_POLL_RX_ON,
                            });
                        } else {
                            self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                        }
                    }
                }
            }
            Event::ApsConfirm { request_id, status } => {
                if self.zdp_confirm_failed(*request_id, *status) {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                }
            }
            Event::SimpleDescriptor => {
                actions.push(Action::CancelTimer {
                    level: StateLevel::Top,
                });
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                actions.push(Action::EnqueueInternal {
                    event: Event::Awake,
                });
            }
            Event::StateTimeout { .. } => {
                info!(key = %self.key, "read ZDP simple descriptor timeout");
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
            }
            _ => {}
        }
    }

    /// #5 Reads the Basic cluster attributes needed to match a DDF.
    ///
    /// Fill order is deterministic: copy from a sub-device that already
    /// carries the item, otherwise read over the air. The first read that
    /// fails to enqueue aborts the pass and falls back to init.
    fn basic_cluster_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                const BASIC_ITEMS: [(&str, u16); 2] = [
                    (item::ATTR_MANUFACTURER_NAME, ATTR_ID_MANUFACTURER_NAME),
                    (item::ATTR_MODEL_ID, ATTR_ID_MODEL_ID),
                ];

                let subs = self.sub_devices();
                let mut filled = 0;

                for (suffix, attr_id) in BASIC_ITEMS {
                    if self.fill_item_from_sub_devices(suffix, &subs) {
                        filled += 1;
                        continue;
                    }

                    if self.zcl_read(suffix, BASIC_CLUSTER_ID, attr_id) {
                        actions.push(Action::SetTimer {
                            level: StateLevel::Top,
                            duration: MIN_MAC_POLL_RX_ON,
                        });
                        return; // keep state, wait for the attribute or the timeout
                    }

                    info!(key = %self.key, item = suffix, "failed to read basic cluster attribute");
                    break;
                }

                if filled != BASIC_ITEMS.len() {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                } else {
                    let model = self
                        .item(item::ATTR_MODEL_ID)
                        .map(|i| i.to_str().to_string())
                        .unwrap_or_default();
                    info!(key = %self.key, model = %model, "basic cluster attributes verified");
                    self.set_state(
                        Some(DeviceState::GetDeviceDescription),
                        StateLevel::Top,
                        actions,
                    );
                }
            }
            Event::ApsConfirm { request_id, status } => {
                if self.pending_read.enqueued
                    && *request_id == self.pending_read.aps_req_id
                    && *status != APS_SUCCESS
                {
                    self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                }
            }
            Event::ItemChanged { suffix, .. }
                if suffix == item::ATTR_MANUFACTURER_NAME || suffix == item::ATTR_MODEL_ID =>
            {
                debug!(key = %self.key, item = %suffix, "received basic cluster attribute");
                actions.push(Action::CancelTimer {
                    level: StateLevel::Top,
                });
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
                actions.push(Action::EnqueueInternal {
                    event: Event::Awake,
                });
            }
            Event::StateTimeout { .. } => {
                info!(key = %self.key, "read basic cluster timeout");
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
            }
            _ => {}
        }
    }

    /// #6 Asks the DDF engine for a device description.
    ///
    /// Matching runs asynchronously so thousands of description files can
    /// be lazy loaded; the core never blocks on the verdict.
    fn get_device_description_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                actions.push(Action::EnqueueInternal {
                    event: Event::DdfInitRequest,
                });
            }
            Event::DdfInitResponse { matched } => {
                if *matched {
                    self.set_state(Some(DeviceState::Idle), StateLevel::Top, actions);
                } else {
                    self.set_state(Some(DeviceState::Dead), StateLevel::Top, actions);
                }
            }
            _ => {}
        }
    }

    /// #7 Operational state; runs the sub-machines in parallel.
    ///
    /// `Idle : Bindings | Polling | ItemChange`
    fn idle_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                self.set_state(Some(DeviceState::BindingIdle), StateLevel::Binding, actions);
                self.set_state(Some(DeviceState::PollIdle), StateLevel::Poll, actions);
                return;
            }
            Event::StateLeave { .. } => {
                self.set_state(None, StateLevel::Binding, actions);
                self.set_state(None, StateLevel::Poll, actions);
                return;
            }
            Event::DdfReload => {
                // the description may have changed, re-evaluate everything
                self.set_state(Some(DeviceState::Init), StateLevel::Top, actions);
            }
            _ => {}
        }

        self.check_item_changes(event);

        // process parallel states
        self.handle_event(event, StateLevel::Binding, actions);
        self.handle_event(event, StateLevel::Poll, actions);
    }

    /// Terminal state; only logs its entry.
    fn dead_state(&mut self, event: &Event, _actions: &mut Vec<Action>) {
        if let Event::StateEnter { .. } = event {
            self.pending_zdp = ApsResult::default();
            self.pending_read = ApsResult::default();
            info!(key = %self.key, "device entered dead state");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether a confirm matches the in-flight ZDP request with a failure.
    fn zdp_confirm_failed(&self, request_id: u8, status: u8) -> bool {
        self.pending_zdp.enqueued
            && self.pending_zdp.aps_req_id == request_id
            && status != APS_SUCCESS
    }

    /// Try to fill a device item from the sub-devices if not already set.
    fn fill_item_from_sub_devices(&mut self, suffix: &str, subs: &[Arc<SubDevice>]) -> bool {
        if self.item(suffix).is_some_and(ResourceItem::is_set) {
            return true;
        }

        for sub in subs {
            let Some(sitem) = sub.item(suffix) else {
                continue;
            };
            if !sitem.is_set() {
                continue;
            }
            if let Some(value) = sitem.value().cloned() {
                let now = self.now;
                if let Some(ditem) = self.item_mut(suffix) {
                    if ditem.set_value(value, now) {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// First simple descriptor offering `cluster_id` as a server cluster.
    fn simple_descriptor_for_server_cluster(&self, cluster_id: u16) -> Option<SimpleDescriptor> {
        let node = self.node.as_ref()?;
        node.simple_descriptors()
            .into_iter()
            .find(|sd| sd.has_in_cluster(cluster_id))
    }

    /// Issue a ZCL Read Attributes request for one device item.
    fn zcl_read(&mut self, suffix: &str, cluster_id: u16, attr_id: u16) -> bool {
        if !self.reachable() {
            info!(key = %self.key, item = suffix, "device not reachable, skip read");
            return false;
        }

        let Some(sd) = self.simple_descriptor_for_server_cluster(cluster_id) else {
            warn!(key = %self.key, cluster = cluster_id, "no endpoint offers cluster");
            return false;
        };

        let req = ZclReadReq {
            endpoint: sd.endpoint,
            cluster_id,
            attributes: vec![attr_id],
        };
        let ext = self.item_u64(item::ATTR_EXT_ADDRESS);
        let nwk = self.item_u64(item::ATTR_NWK_ADDRESS) as u16;

        self.pending_read = self.services.aps.zcl_read_attributes(&req, ext, nwk);
        self.pending_read.enqueued
    }
}

impl StateMachine for Device {
    fn handle(&mut self, event: &Event) -> Vec<Action> {
        let mut actions = Vec::new();
        // a timeout is targeted at the level whose timer armed it
        let level = match event {
            Event::StateTimeout { level } => *level,
            _ => StateLevel::Top,
        };
        self.handle_event(event, level, &mut actions);
        actions
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}
