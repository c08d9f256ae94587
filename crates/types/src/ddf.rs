//! Device description file (DDF) metadata consumed by the poll engine.
//!
//! A DDF is a JSON description matched by manufacturer/model. Matching is
//! asynchronous and flows over the event mailbox; the per-item metadata and
//! read function lookups here answer synchronously from already loaded
//! descriptions.

use crate::aps::{ApsController, ApsResult};
use crate::resource::{ResourceItem, SubDevice};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while handling DDF metadata.
#[derive(Debug, Error)]
pub enum DdfError {
    #[error("invalid read parameters: {0}")]
    InvalidReadParameters(#[from] serde_json::Error),
}

/// Per-item read parameters from a device description file.
///
/// The `fn` key selects the read function; the remaining keys parameterize
/// it. An entry without a function is considered empty and never polled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadParameters {
    /// Read function selector, e.g. `"zcl"`.
    #[serde(rename = "fn", default)]
    pub function: String,
    /// Source endpoint.
    #[serde(rename = "ep", default)]
    pub endpoint: u8,
    /// Cluster to read from.
    #[serde(rename = "cl", default)]
    pub cluster_id: u16,
    /// Attribute ids to read.
    #[serde(rename = "at", default)]
    pub attributes: Vec<u16>,
    /// Manufacturer code for manufacturer-specific attributes.
    #[serde(rename = "mf", default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_code: Option<u16>,
}

impl ReadParameters {
    /// Parse the `"read"` object of a DDF item entry.
    pub fn from_json(raw: &str) -> Result<Self, DdfError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Empty read parameters disqualify an item from polling.
    pub fn is_empty(&self) -> bool {
        self.function.is_empty()
    }
}

/// A read function issues the APS request refreshing one item.
pub type ReadFunction =
    Arc<dyn Fn(&SubDevice, &ResourceItem, &dyn ApsController, &ReadParameters) -> ApsResult + Send + Sync>;

/// Synchronous lookups into loaded device descriptions.
pub trait DdfResolver: Send + Sync {
    /// Read parameters for one sub-device item, if its DDF entry has any.
    fn read_parameters(&self, sub: &SubDevice, suffix: &str) -> Option<ReadParameters>;

    /// Resolve the read function selected by the parameters.
    fn read_function(&self, params: &ReadParameters) -> Option<ReadFunction>;
}
