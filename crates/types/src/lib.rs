//! Core types for the zigbridge device control core.
//!
//! This crate provides the foundational types used throughout the gateway
//! implementation:
//!
//! - **Identity**: [`DeviceKey`], unique id formatting
//! - **Node model**: [`Node`], [`NodeDescriptor`], [`SimpleDescriptor`], [`Binding`]
//! - **Resource model**: [`SubDevice`], [`ResourceItem`], [`Value`], [`StateChange`]
//! - **DDF metadata**: [`ReadParameters`], [`DdfResolver`]
//! - **Collaborator traits**: [`ApsController`], [`NodeRegistry`], [`ResourceStore`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Externally
//! owned data ([`Node`], [`SubDevice`]) sits behind handles with interior
//! mutability: the lower layers update it, the control core re-reads it on
//! every access.

mod aps;
mod ddf;
mod node;
mod resource;

pub use aps::{ApsController, ApsResult, ZclReadReq, APS_SUCCESS};
pub use ddf::{DdfError, DdfResolver, ReadFunction, ReadParameters};
pub use node::{
    Binding, BindingDestination, Node, NodeDescriptor, NodeRegistry, SimpleDescriptor,
    INVALID_DEVICE_ID,
};
pub use resource::{
    ChangeStatus, ResourceItem, ResourcePrefix, ResourceStore, StateChange, SubDevice, Value,
};

use std::fmt;
use std::time::Duration;

/// Upper bound within which a mains-powered or just-awoken device is
/// expected to respond. 7680 ms plus some space for timeout.
pub const MIN_MAC_POLL_RX_ON: Duration = Duration::from_millis(8000);

/// A poll item is dropped once its read failed this many times.
pub const MAX_POLL_ITEM_RETRIES: usize = 3;

/// Steady-state interval between two binding table verification passes.
pub const BINDING_VERIFY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// ZDP status for a successful management request.
pub const ZDP_SUCCESS: u8 = 0x00;
/// ZDP status for a management request the remote does not implement.
pub const ZDP_NOT_SUPPORTED: u8 = 0x84;

/// ZCL Basic cluster.
pub const BASIC_CLUSTER_ID: u16 = 0x0000;
/// Basic cluster attribute id of the manufacturer name string.
pub const ATTR_ID_MANUFACTURER_NAME: u16 = 0x0004;
/// Basic cluster attribute id of the model identifier string.
pub const ATTR_ID_MODEL_ID: u16 = 0x0005;

/// Unique identity of a physical (or logical) end-device, usually the
/// 64-bit IEEE MAC address. Stable across the device's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey(pub u64);

impl DeviceKey {
    /// Green Power devices have no IEEE address; their keys live in the
    /// lower 32 bits.
    pub fn is_green_power(&self) -> bool {
        (self.0 & 0xFFFF_FFFF_0000_0000) == 0
    }

    /// Format the key as eight colon-separated hex octets, the canonical
    /// unique id of the device resource itself.
    pub fn unique_id(&self) -> String {
        let b = self.0.to_be_bytes();
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Resource item suffixes known to the device core.
///
/// Sub-device items driven by DDF files use arbitrary suffixes; these are
/// the ones the core itself reads and writes.
pub mod item {
    /// IEEE address of the device.
    pub const ATTR_EXT_ADDRESS: &str = "attr/extaddress";
    /// Short network address of the device.
    pub const ATTR_NWK_ADDRESS: &str = "attr/nwkaddress";
    /// Canonical unique id.
    pub const ATTR_UNIQUE_ID: &str = "attr/uniqueid";
    /// Manufacturer name from the ZCL Basic cluster.
    pub const ATTR_MANUFACTURER_NAME: &str = "attr/manufacturername";
    /// Model identifier from the ZCL Basic cluster.
    pub const ATTR_MODEL_ID: &str = "attr/modelid";
    /// Whether the device sleeps between MAC polls.
    pub const ATTR_SLEEPER: &str = "attr/sleeper";
    /// Timestamp of the last frame seen from the device.
    pub const ATTR_LAST_SEEN: &str = "attr/lastseen";
    /// Stored reachability verdict.
    pub const STATE_REACHABLE: &str = "state/reachable";
    /// Stored reachability verdict of config-style resources.
    pub const CONFIG_REACHABLE: &str = "config/reachable";
    /// Timestamp of the last state update.
    pub const STATE_LAST_UPDATED: &str = "state/lastupdated";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_key_unique_id_format() {
        let key = DeviceKey(0x0021_2E00_0000_0001);
        assert_eq!(key.unique_id(), "00:21:2e:00:00:00:00:01");
        assert_eq!(key.to_string(), "0x00212E0000000001");
    }

    #[test]
    fn green_power_keys_have_empty_upper_half() {
        assert!(DeviceKey(0x0000_0000_1234_5678).is_green_power());
        assert!(!DeviceKey(0x0021_2E00_0000_0001).is_green_power());
    }
}
