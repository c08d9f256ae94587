//! Production embedding of the device control core.
//!
//! The gateway host links this crate as a library (the control core runs
//! inside the host process, next to the radio stack) and supplies the real
//! APS controller, node registry, resource store and DDF engine. This
//! crate contributes:
//!
//! - [`GatewayRunner`]: tokio event loop driving the device registry
//! - [`TimerManager`]: one single-shot timer per armed `(device, level)`
//! - [`RuntimeArgs`]: command line options forwarded by the host
//! - Telemetry: tracing initialization and a Prometheus metrics endpoint
//!
//! The state machines themselves stay synchronous; this crate only turns
//! their actions into timers and mailbox deliveries and feeds expirations
//! and confirms back in, preserving per-device mailbox order.

mod args;
mod metrics;
mod runner;
mod telemetry;
mod timers;

pub use args::RuntimeArgs;
pub use metrics::Metrics;
pub use runner::{
    DdfEngine, DeviceSnapshot, GatewayCommand, GatewayHandle, GatewayRunner, RunnerError,
    ShutdownHandle,
};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
pub use timers::TimerManager;
