//! Scriptable collaborator fixtures.
//!
//! These stand in for the radio stack, the node registry, the resource
//! store and the DDF engine. Tests configure behavior up front (enqueue
//! verdicts, confirm statuses, match verdicts, node contents) and the
//! runner feeds generated confirms back into the event queue.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use zigbridge_core::Event;
use zigbridge_types::{
    ApsController, ApsResult, DdfResolver, DeviceKey, Node, NodeRegistry, ReadFunction,
    ReadParameters, ResourcePrefix, ResourceStore, SubDevice, ZclReadReq,
};

/// One recorded APS request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApsRecord {
    NodeDescriptor { nwk: u16 },
    ActiveEndpoints { nwk: u16 },
    SimpleDescriptor { nwk: u16, endpoint: u8 },
    ZclRead { req: ZclReadReq, ext: u64, nwk: u16 },
}

#[derive(Debug)]
struct ApsInner {
    accept_zdp: bool,
    accept_zcl: bool,
    /// Auto-deliver a confirm with this status for every accepted request.
    confirm_status: Option<u8>,
    confirm_latency: Duration,
    next_id: u8,
    log: Vec<ApsRecord>,
    outbox: Vec<(Duration, Event)>,
}

/// Simulated APS controller.
///
/// Requests are logged; the enqueue verdict and the confirm behavior are
/// scripted. Generated confirms land in an outbox the runner drains into
/// the event queue after each handler call.
pub struct SimulatedAps {
    inner: Mutex<ApsInner>,
}

impl Default for SimulatedAps {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAps {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ApsInner {
                accept_zdp: true,
                accept_zcl: true,
                confirm_status: None,
                confirm_latency: Duration::from_millis(20),
                next_id: 1,
                log: Vec::new(),
                outbox: Vec::new(),
            }),
        }
    }

    /// Accept or refuse ZDP requests from now on.
    pub fn set_accept_zdp(&self, accept: bool) {
        self.inner.lock().accept_zdp = accept;
    }

    /// Accept or refuse ZCL requests from now on.
    pub fn set_accept_zcl(&self, accept: bool) {
        self.inner.lock().accept_zcl = accept;
    }

    /// Auto-confirm every accepted request with this status; `None`
    /// silences confirms entirely (frames vanish into the air).
    pub fn set_confirm_status(&self, status: Option<u8>) {
        self.inner.lock().confirm_status = status;
    }

    pub fn set_confirm_latency(&self, latency: Duration) {
        self.inner.lock().confirm_latency = latency;
    }

    pub fn requests(&self) -> Vec<ApsRecord> {
        self.inner.lock().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// The request id handed out most recently.
    pub fn last_request_id(&self) -> u8 {
        self.inner.lock().next_id.wrapping_sub(1)
    }

    /// Drain confirms generated since the last call.
    pub fn take_outbox(&self) -> Vec<(Duration, Event)> {
        std::mem::take(&mut self.inner.lock().outbox)
    }

    fn record(&self, record: ApsRecord, zdp: bool) -> ApsResult {
        let mut inner = self.inner.lock();
        inner.log.push(record);

        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1).max(1);

        let enqueued = if zdp { inner.accept_zdp } else { inner.accept_zcl };
        if enqueued {
            if let Some(status) = inner.confirm_status {
                let latency = inner.confirm_latency;
                inner.outbox.push((
                    latency,
                    Event::ApsConfirm {
                        request_id: id,
                        status,
                    },
                ));
            }
        }

        ApsResult {
            enqueued,
            aps_req_id: id,
            sequence_number: id,
        }
    }
}

impl ApsController for SimulatedAps {
    fn zdp_node_descriptor_req(&self, nwk: u16) -> ApsResult {
        self.record(ApsRecord::NodeDescriptor { nwk }, true)
    }

    fn zdp_active_endpoints_req(&self, nwk: u16) -> ApsResult {
        self.record(ApsRecord::ActiveEndpoints { nwk }, true)
    }

    fn zdp_simple_descriptor_req(&self, nwk: u16, endpoint: u8) -> ApsResult {
        self.record(ApsRecord::SimpleDescriptor { nwk, endpoint }, true)
    }

    fn zcl_read_attributes(&self, req: &ZclReadReq, ext: u64, nwk: u16) -> ApsResult {
        self.record(
            ApsRecord::ZclRead {
                req: req.clone(),
                ext,
                nwk,
            },
            false,
        )
    }
}

/// Simulated node registry.
#[derive(Default)]
pub struct SimNodes {
    nodes: Mutex<HashMap<DeviceKey, Arc<Node>>>,
}

impl SimNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a node; the handle stays shared so tests can mutate contents
    /// while the simulation runs.
    pub fn insert(&self, key: DeviceKey, ext: u64, nwk: u16) -> Arc<Node> {
        let node = Arc::new(Node::new(ext, nwk));
        self.nodes.lock().insert(key, Arc::clone(&node));
        node
    }

    pub fn get(&self, key: DeviceKey) -> Option<Arc<Node>> {
        self.nodes.lock().get(&key).cloned()
    }

    pub fn remove(&self, key: DeviceKey) {
        self.nodes.lock().remove(&key);
    }
}

impl NodeRegistry for SimNodes {
    fn get_node(&self, key: DeviceKey) -> Option<Arc<Node>> {
        self.nodes.lock().get(&key).cloned()
    }
}

/// Simulated resource store.
#[derive(Default)]
pub struct SimResources {
    subs: Mutex<HashMap<(ResourcePrefix, String), Arc<SubDevice>>>,
}

impl SimResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sub: Arc<SubDevice>) {
        self.subs
            .lock()
            .insert((sub.prefix(), sub.unique_id().to_string()), sub);
    }

    pub fn remove(&self, prefix: ResourcePrefix, unique_id: &str) {
        self.subs.lock().remove(&(prefix, unique_id.to_string()));
    }
}

impl ResourceStore for SimResources {
    fn resource(&self, prefix: ResourcePrefix, unique_id: &str) -> Option<Arc<SubDevice>> {
        self.subs
            .lock()
            .get(&(prefix, unique_id.to_string()))
            .cloned()
    }
}

/// Simulated DDF engine: match verdicts per device, read parameters per
/// item suffix, read functions per function name.
pub struct SimDdf {
    matched: Mutex<HashMap<DeviceKey, bool>>,
    matched_default: bool,
    read_parameters: Mutex<HashMap<String, ReadParameters>>,
    read_functions: Mutex<HashMap<String, ReadFunction>>,
}

impl SimDdf {
    pub fn new(matched_default: bool) -> Self {
        Self {
            matched: Mutex::new(HashMap::new()),
            matched_default,
            read_parameters: Mutex::new(HashMap::new()),
            read_functions: Mutex::new(HashMap::new()),
        }
    }

    /// Override the match verdict for one device.
    pub fn set_matched(&self, key: DeviceKey, matched: bool) {
        self.matched.lock().insert(key, matched);
    }

    pub fn matched(&self, key: DeviceKey) -> bool {
        self.matched
            .lock()
            .get(&key)
            .copied()
            .unwrap_or(self.matched_default)
    }

    pub fn set_read_parameters(&self, suffix: &str, params: ReadParameters) {
        self.read_parameters
            .lock()
            .insert(suffix.to_string(), params);
    }

    pub fn set_read_function(&self, function: &str, f: ReadFunction) {
        self.read_functions.lock().insert(function.to_string(), f);
    }
}

impl DdfResolver for SimDdf {
    fn read_parameters(&self, _sub: &SubDevice, suffix: &str) -> Option<ReadParameters> {
        self.read_parameters.lock().get(suffix).cloned()
    }

    fn read_function(&self, params: &ReadParameters) -> Option<ReadFunction> {
        self.read_functions.lock().get(&params.function).cloned()
    }
}
