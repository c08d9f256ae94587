//! In-crate test doubles for the injected collaborators.

use crate::state::Services;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
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

/// APS controller double: records every request and answers with a
/// configurable enqueue verdict and counting request ids.
pub struct RecordingAps {
    accept: AtomicBool,
    next_id: AtomicU8,
    log: Mutex<Vec<ApsRecord>>,
}

impl RecordingAps {
    pub fn new() -> Self {
        Self {
            accept: AtomicBool::new(true),
            next_id: AtomicU8::new(1),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<ApsRecord> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, record: ApsRecord) -> ApsResult {
        self.log.lock().unwrap().push(record);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        ApsResult {
            enqueued: self.accept.load(Ordering::SeqCst),
            aps_req_id: id,
            sequence_number: id,
        }
    }
}

impl ApsController for RecordingAps {
    fn zdp_node_descriptor_req(&self, nwk: u16) -> ApsResult {
        self.record(ApsRecord::NodeDescriptor { nwk })
    }

    fn zdp_active_endpoints_req(&self, nwk: u16) -> ApsResult {
        self.record(ApsRecord::ActiveEndpoints { nwk })
    }

    fn zdp_simple_descriptor_req(&self, nwk: u16, endpoint: u8) -> ApsResult {
        self.record(ApsRecord::SimpleDescriptor { nwk, endpoint })
    }

    fn zcl_read_attributes(&self, req: &ZclReadReq, ext: u64, nwk: u16) -> ApsResult {
        self.record(ApsRecord::ZclRead {
            req: req.clone(),
            ext,
            nwk,
        })
    }
}

/// Node registry double backed by a map.
pub struct MapNodes {
    nodes: Mutex<HashMap<DeviceKey, Arc<Node>>>,
}

impl MapNodes {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: DeviceKey, ext: u64, nwk: u16) -> Arc<Node> {
        let node = Arc::new(Node::new(ext, nwk));
        self.nodes.lock().unwrap().insert(key, Arc::clone(&node));
        node
    }
}

impl NodeRegistry for MapNodes {
    fn get_node(&self, key: DeviceKey) -> Option<Arc<Node>> {
        self.nodes.lock().unwrap().get(&key).cloned()
    }
}

/// Resource store double backed by a map.
pub struct MapResources {
    subs: Mutex<HashMap<(ResourcePrefix, String), Arc<SubDevice>>>,
}

impl MapResources {
    pub fn new() -> Self {
        Self {
            subs: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, sub: Arc<SubDevice>) {
        self.subs
            .lock()
            .unwrap()
            .insert((sub.prefix(), sub.unique_id().to_string()), sub);
    }

    pub fn contains(&self, prefix: ResourcePrefix, unique_id: &str) -> bool {
        self.subs
            .lock()
            .unwrap()
            .contains_key(&(prefix, unique_id.to_string()))
    }
}

impl ResourceStore for MapResources {
    fn resource(&self, prefix: ResourcePrefix, unique_id: &str) -> Option<Arc<SubDevice>> {
        self.subs
            .lock()
            .unwrap()
            .get(&(prefix, unique_id.to_string()))
            .cloned()
    }
}

/// DDF resolver double with per-suffix read parameters and a read function
/// table keyed by function name.
pub struct MapDdf {
    read_parameters: Mutex<HashMap<String, ReadParameters>>,
    read_functions: Mutex<HashMap<String, ReadFunction>>,
}

impl MapDdf {
    pub fn new() -> Self {
        Self {
            read_parameters: Mutex::new(HashMap::new()),
            read_functions: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_read_parameters(&self, suffix: &str, params: ReadParameters) {
        self.read_parameters
            .lock()
            .unwrap()
            .insert(suffix.to_string(), params);
    }

    pub fn set_read_function(&self, function: &str, f: ReadFunction) {
        self.read_functions
            .lock()
            .unwrap()
            .insert(function.to_string(), f);
    }
}

impl DdfResolver for MapDdf {
    fn read_parameters(&self, _sub: &SubDevice, suffix: &str) -> Option<ReadParameters> {
        self.read_parameters.lock().unwrap().get(suffix).cloned()
    }

    fn read_function(&self, params: &ReadParameters) -> Option<ReadFunction> {
        self.read_functions
            .lock()
            .unwrap()
            .get(&params.function)
            .cloned()
    }
}

/// Handles to the test doubles behind a [`Services`] bundle.
pub struct TestFixture {
    pub aps: Arc<RecordingAps>,
    pub nodes: Arc<MapNodes>,
    pub resources: Arc<MapResources>,
    pub ddf: Arc<MapDdf>,
}

pub fn test_services() -> (Arc<Services>, TestFixture) {
    let aps = Arc::new(RecordingAps::new());
    let nodes = Arc::new(MapNodes::new());
    let resources = Arc::new(MapResources::new());
    let ddf = Arc::new(MapDdf::new());

    let services = Arc::new(Services {
        aps: Arc::clone(&aps) as Arc<dyn ApsController>,
        nodes: Arc::clone(&nodes) as Arc<dyn NodeRegistry>,
        resources: Arc::clone(&resources) as Arc<dyn ResourceStore>,
        ddf: Arc::clone(&ddf) as Arc<dyn DdfResolver>,
    });

    (
        services,
        TestFixture {
            aps,
            nodes,
            resources,
            ddf,
        },
    )
}
