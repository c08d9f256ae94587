//! Core node registry model.
//!
//! Nodes are owned by the lower radio layer; the control core holds an
//! `Arc<Node>` handle and re-reads the contents on every access. Descriptors
//! and the binding table fill in asynchronously as ZDP responses arrive.

use crate::DeviceKey;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// A simple descriptor with this device id has not been fetched yet.
pub const INVALID_DEVICE_ID: u16 = 0xFFFF;

/// ZDP node descriptor, reduced to the fields the core consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeDescriptor {
    /// Manufacturer code assigned by the Zigbee alliance.
    pub manufacturer_code: u16,
    /// Set for mains-powered devices which keep their receiver enabled.
    pub receiver_on_when_idle: bool,
}

/// ZDP simple descriptor of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    /// Server clusters offered by the endpoint.
    pub in_clusters: Vec<u16>,
    /// Client clusters offered by the endpoint.
    pub out_clusters: Vec<u16>,
}

impl SimpleDescriptor {
    /// A descriptor is valid once a real device id has been fetched.
    pub fn is_valid(&self) -> bool {
        self.device_id != INVALID_DEVICE_ID
    }

    /// Whether the endpoint offers `cluster_id` as a server (input) cluster.
    pub fn has_in_cluster(&self, cluster_id: u16) -> bool {
        self.in_clusters.contains(&cluster_id)
    }
}

/// Destination of a binding table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingDestination {
    /// Unicast binding to an extended address and endpoint.
    Extended { address: u64, endpoint: u8 },
    /// Group binding.
    Group { group: u16 },
}

/// One entry of a node's binding table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub src_address: u64,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub destination: BindingDestination,
    /// When the binding was last confirmed on air, if ever.
    pub confirmed_at: Option<Duration>,
}

#[derive(Debug, Default)]
struct NodeInner {
    ext_address: u64,
    nwk_address: u16,
    node_descriptor: Option<NodeDescriptor>,
    endpoints: Vec<u8>,
    simple_descriptors: Vec<SimpleDescriptor>,
    binding_table: Vec<Binding>,
}

/// A node in the core registry.
///
/// The radio layer mutates the contents as frames arrive; every mutation is
/// also announced through the event mailbox so the state machine re-reads
/// the handle instead of caching values.
#[derive(Debug, Default)]
pub struct Node {
    inner: RwLock<NodeInner>,
}

impl Node {
    pub fn new(ext_address: u64, nwk_address: u16) -> Self {
        Self {
            inner: RwLock::new(NodeInner {
                ext_address,
                nwk_address,
                ..NodeInner::default()
            }),
        }
    }

    pub fn ext_address(&self) -> u64 {
        self.inner.read().ext_address
    }

    pub fn nwk_address(&self) -> u16 {
        self.inner.read().nwk_address
    }

    /// The short address can change after a rejoin.
    pub fn set_nwk_address(&self, nwk: u16) {
        self.inner.write().nwk_address = nwk;
    }

    pub fn node_descriptor(&self) -> Option<NodeDescriptor> {
        self.inner.read().node_descriptor
    }

    pub fn set_node_descriptor(&self, descriptor: NodeDescriptor) {
        self.inner.write().node_descriptor = Some(descriptor);
    }

    pub fn endpoints(&self) -> Vec<u8> {
        self.inner.read().endpoints.clone()
    }

    pub fn set_endpoints(&self, endpoints: Vec<u8>) {
        self.inner.write().endpoints = endpoints;
    }

    pub fn simple_descriptor(&self, endpoint: u8) -> Option<SimpleDescriptor> {
        self.inner
            .read()
            .simple_descriptors
            .iter()
            .find(|sd| sd.endpoint == endpoint)
            .cloned()
    }

    pub fn simple_descriptors(&self) -> Vec<SimpleDescriptor> {
        self.inner.read().simple_descriptors.clone()
    }

    /// Insert or replace the simple descriptor for its endpoint.
    pub fn upsert_simple_descriptor(&self, descriptor: SimpleDescriptor) {
        let mut inner = self.inner.write();
        match inner
            .simple_descriptors
            .iter_mut()
            .find(|sd| sd.endpoint == descriptor.endpoint)
        {
            Some(slot) => *slot = descriptor,
            None => inner.simple_descriptors.push(descriptor),
        }
    }

    pub fn binding_table(&self) -> Vec<Binding> {
        self.inner.read().binding_table.clone()
    }

    pub fn binding_count(&self) -> usize {
        self.inner.read().binding_table.len()
    }

    pub fn binding_at(&self, index: usize) -> Option<Binding> {
        self.inner.read().binding_table.get(index).cloned()
    }

    pub fn set_binding_table(&self, table: Vec<Binding>) {
        self.inner.write().binding_table = table;
    }
}

/// Registry of nodes known to the radio layer.
///
/// Lookups happen lazily and repeatedly; a node may disappear when the
/// lower layer removes it.
pub trait NodeRegistry: Send + Sync {
    fn get_node(&self, key: DeviceKey) -> Option<Arc<Node>>;
}
