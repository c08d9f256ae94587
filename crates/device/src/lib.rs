//! Per-device control core of the gateway.
//!
//! This crate drives each physical (or logical) end-device through
//! discovery, description matching, operational maintenance, and
//! termination as a synchronous, event-driven model.
//!
//! # Architecture
//!
//! Every [`Device`] runs a hierarchical state machine on three levels:
//!
//! - **Level 0** (top): `Init → NodeDescriptor → ActiveEndpoints →
//!   SimpleDescriptor → BasicCluster → GetDeviceDescription → Idle / Dead`
//! - **Level 1** (binding): `BindingIdle ↔ BindingTableVerify`
//! - **Level 2** (poll): `PollIdle → PollNext → PollBusy → PollNext …`
//!
//! The sub-machines at levels 1 and 2 are installed exactly while the top
//! level is `Idle` and receive their events forwarded by it. Every ZDP and
//! ZCL round-trip is bounded by a per-level single-shot timer; any failure
//! or timeout during verification funnels back through `Init`, which
//! concentrates all progress decisions in one place.
//!
//! All I/O is performed by a runner via returned `Action`s; the APS
//! controller, node registry, resource store and DDF resolver are injected
//! synchronous collaborators (see [`Services`]).

mod binding;
mod poll;
mod registry;
mod state;
mod sweep;

#[cfg(test)]
mod testutil;

pub use poll::PollItem;
pub use registry::DeviceRegistry;
pub use state::{Device, DeviceState, Services};
