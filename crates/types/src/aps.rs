//! Application Support Sublayer controller interface.
//!
//! The APS controller is the transport the core enqueues ZDP and ZCL frames
//! into. Enqueue results are returned synchronously; delivery confirms come
//! back later through the event mailbox as `ApsConfirm` events.

/// APS confirm status signalling successful delivery.
pub const APS_SUCCESS: u8 = 0x00;

/// Outcome of asking the APS controller to enqueue a request.
///
/// `aps_req_id` correlates the later confirm with this request;
/// `sequence_number` correlates a ZDP/ZCL response frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApsResult {
    /// Whether the controller accepted the frame. `false` is ordinary
    /// backpressure and treated like any retryable failure.
    pub enqueued: bool,
    /// APS request id the confirm will carry.
    pub aps_req_id: u8,
    /// ZDP/ZCL sequence number of the outgoing frame.
    pub sequence_number: u8,
}

/// Parameters of a ZCL Read Attributes request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclReadReq {
    /// Destination endpoint offering the cluster as input cluster.
    pub endpoint: u8,
    /// Cluster to read from.
    pub cluster_id: u16,
    /// Attribute ids to read.
    pub attributes: Vec<u16>,
}

/// Process-wide APS controller, used only from the event thread.
///
/// Implementations deliver `ApsConfirm { request_id, status }` into the
/// mailbox for every enqueued request, where status [`APS_SUCCESS`] means
/// the frame was acknowledged.
pub trait ApsController: Send + Sync {
    /// Enqueue a ZDP Node_Descriptor_req for the given network address.
    fn zdp_node_descriptor_req(&self, nwk: u16) -> ApsResult;

    /// Enqueue a ZDP Active_Endpoints_req for the given network address.
    fn zdp_active_endpoints_req(&self, nwk: u16) -> ApsResult;

    /// Enqueue a ZDP Simple_Descriptor_req for one endpoint.
    fn zdp_simple_descriptor_req(&self, nwk: u16, endpoint: u8) -> ApsResult;

    /// Enqueue a ZCL Read Attributes request.
    fn zcl_read_attributes(&self, req: &ZclReadReq, ext: u64, nwk: u16) -> ApsResult;
}
