//! Gateway metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters. Use
//! traces for event-level granularity during investigations.

use prometheus::{register_counter, register_gauge, Counter, Gauge};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific metrics for gateway monitoring.
pub struct Metrics {
    // === Devices ===
    /// Devices currently held by the registry.
    pub devices_registered: Gauge,
    /// Devices parked in the dead state.
    pub devices_dead: Gauge,

    // === Event flow ===
    /// Events delivered to devices.
    pub events_processed: Counter,
    /// Actions returned by device state machines.
    pub actions_generated: Counter,

    // === Timers ===
    /// Per-level single-shot timers armed.
    pub timers_set: Counter,

    // === DDF ===
    /// Device description match requests dispatched.
    pub ddf_requests: Counter,
}

impl Metrics {
    /// Get the global metrics instance, registering on first use.
    pub fn global() -> &'static Metrics {
        METRICS.get_or_init(|| Metrics {
            devices_registered: register_gauge!(
                "zigbridge_devices_registered",
                "Devices currently held by the registry"
            )
            .expect("metric registration"),
            devices_dead: register_gauge!(
                "zigbridge_devices_dead",
                "Devices parked in the dead state"
            )
            .expect("metric registration"),
            events_processed: register_counter!(
                "zigbridge_events_processed_total",
                "Events delivered to devices"
            )
            .expect("metric registration"),
            actions_generated: register_counter!(
                "zigbridge_actions_generated_total",
                "Actions returned by device state machines"
            )
            .expect("metric registration"),
            timers_set: register_counter!(
                "zigbridge_timers_set_total",
                "Per-level single-shot timers armed"
            )
            .expect("metric registration"),
            ddf_requests: register_counter!(
                "zigbridge_ddf_requests_total",
                "Device description match requests dispatched"
            )
            .expect("metric registration"),
        })
    }
}
