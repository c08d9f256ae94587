//! Resource model: sub-devices and their attribute items.
//!
//! Sub-device resources are owned by an external store; the control core
//! keeps only `(prefix, unique id)` tuples and resolves live handles through
//! [`ResourceStore`] on every use. Items carry the `last_set` timestamp and
//! `refresh_interval` hint the poll engine schedules by.

use crate::aps::ApsController;
use crate::{DeviceKey, MIN_MAC_POLL_RX_ON};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

/// Resource namespaces a sub-device can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourcePrefix {
    Devices,
    Sensors,
    Lights,
}

impl ResourcePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourcePrefix::Devices => "/devices",
            ResourcePrefix::Sensors => "/sensors",
            ResourcePrefix::Lights => "/lights",
        }
    }
}

/// Value of a resource item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U64(u64),
    Str(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// One attribute item of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceItem {
    suffix: String,
    value: Option<Value>,
    last_set: Option<Duration>,
    refresh_interval: Option<Duration>,
}

impl ResourceItem {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            value: None,
            last_set: None,
            refresh_interval: None,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Set the value and stamp `last_set`. Returns `false` when the new
    /// value's type conflicts with the current one.
    pub fn set_value(&mut self, value: Value, now: Duration) -> bool {
        if let Some(current) = &self.value {
            if std::mem::discriminant(current) != std::mem::discriminant(&value) {
                return false;
            }
        }
        self.value = Some(value);
        self.last_set = Some(now);
        true
    }

    pub fn last_set(&self) -> Option<Duration> {
        self.last_set
    }

    pub fn is_set(&self) -> bool {
        self.last_set.is_some()
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
    }

    /// An item needs a refresh when it was never set or its refresh
    /// interval has elapsed. No interval hint means always refresh.
    pub fn needs_refresh(&self, now: Duration) -> bool {
        match (self.last_set, self.refresh_interval) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(last), Some(interval)) => now.saturating_sub(last) >= interval,
        }
    }

    pub fn to_bool(&self) -> bool {
        self.value.as_ref().and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn to_u64(&self) -> u64 {
        self.value.as_ref().and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn to_str(&self) -> &str {
        self.value.as_ref().and_then(Value::as_str).unwrap_or("")
    }
}

/// Progress of one pending state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// Written, awaiting verification through a reported or read value.
    Scheduled,
    /// The target value was observed on the item.
    Verified,
    /// Verification window elapsed without the value showing up.
    TimedOut,
}

/// A pending write recorded by the resource layer.
///
/// The sweep drives these: `verify_item_change` checks a changed item
/// against the target, `tick` ages the change, completed changes are
/// garbage-collected per sub-device.
#[derive(Debug, Clone)]
pub struct StateChange {
    suffix: String,
    target: Value,
    status: ChangeStatus,
    scheduled_at: Duration,
}

impl StateChange {
    pub fn new(suffix: impl Into<String>, target: Value, now: Duration) -> Self {
        Self {
            suffix: suffix.into(),
            target,
            status: ChangeStatus::Scheduled,
            scheduled_at: now,
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn status(&self) -> ChangeStatus {
        self.status
    }

    /// Check a changed item against the target value.
    pub fn verify_item_change(&mut self, item: &ResourceItem) {
        if self.status != ChangeStatus::Scheduled || item.suffix() != self.suffix {
            return;
        }
        let confirmed = item
            .last_set()
            .is_some_and(|at| at >= self.scheduled_at);
        if confirmed && item.value() == Some(&self.target) {
            self.status = ChangeStatus::Verified;
        }
    }

    /// Age the change. Write re-issue is DDF-driven and handled by the
    /// resource layer itself; the core only times the change out.
    pub fn tick(&mut self, _aps: &dyn ApsController, now: Duration) {
        if self.status == ChangeStatus::Scheduled
            && now.saturating_sub(self.scheduled_at) >= MIN_MAC_POLL_RX_ON
        {
            self.status = ChangeStatus::TimedOut;
        }
    }

    pub fn is_done(&self) -> bool {
        self.status != ChangeStatus::Scheduled
    }
}

/// A logical endpoint-scoped resource (a light, a sensor) hanging off a
/// physical device. Owned by the external store, shared by handle.
#[derive(Debug)]
pub struct SubDevice {
    prefix: ResourcePrefix,
    unique_id: String,
    parent: RwLock<Option<DeviceKey>>,
    items: RwLock<Vec<ResourceItem>>,
    state_changes: Mutex<Vec<StateChange>>,
}

impl SubDevice {
    pub fn new(prefix: ResourcePrefix, unique_id: impl Into<String>) -> Self {
        Self {
            prefix,
            unique_id: unique_id.into(),
            parent: RwLock::new(None),
            items: RwLock::new(Vec::new()),
            state_changes: Mutex::new(Vec::new()),
        }
    }

    pub fn prefix(&self) -> ResourcePrefix {
        self.prefix
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn parent(&self) -> Option<DeviceKey> {
        *self.parent.read()
    }

    pub fn set_parent(&self, parent: Option<DeviceKey>) {
        *self.parent.write() = parent;
    }

    pub fn add_item(&self, item: ResourceItem) {
        let mut items = self.items.write();
        if items.iter().any(|i| i.suffix() == item.suffix()) {
            return;
        }
        items.push(item);
    }

    pub fn item(&self, suffix: &str) -> Option<ResourceItem> {
        self.items.read().iter().find(|i| i.suffix() == suffix).cloned()
    }

    pub fn items(&self) -> Vec<ResourceItem> {
        self.items.read().clone()
    }

    /// Set an item value, stamping `last_set`. Returns `false` when the
    /// item does not exist or the value type conflicts.
    pub fn set_item_value(&self, suffix: &str, value: Value, now: Duration) -> bool {
        let mut items = self.items.write();
        match items.iter_mut().find(|i| i.suffix() == suffix) {
            Some(item) => item.set_value(value, now),
            None => false,
        }
    }

    pub fn push_state_change(&self, change: StateChange) {
        self.state_changes.lock().push(change);
    }

    pub fn has_state_changes(&self) -> bool {
        !self.state_changes.lock().is_empty()
    }

    pub fn state_change_count(&self) -> usize {
        self.state_changes.lock().len()
    }

    /// Run the verify and tick hooks of every pending change.
    pub fn process_state_changes(
        &self,
        changed_item: Option<&ResourceItem>,
        aps: &dyn ApsController,
        now: Duration,
    ) {
        let mut changes = self.state_changes.lock();
        for change in changes.iter_mut() {
            if let Some(item) = changed_item {
                change.verify_item_change(item);
            }
            change.tick(aps, now);
        }
    }

    /// Drop completed changes.
    pub fn cleanup_state_changes(&self) {
        self.state_changes.lock().retain(|c| !c.is_done());
    }
}

/// The store resolving live sub-device handles.
///
/// The store is the single source of truth for sub-device existence; the
/// device core never caches the returned handles.
pub trait ResourceStore: Send + Sync {
    fn resource(&self, prefix: ResourcePrefix, unique_id: &str) -> Option<Arc<SubDevice>>;
}
