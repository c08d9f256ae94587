//! Deterministic simulation of the device control core.
//!
//! The runner processes events in deterministic order and executes the
//! actions devices return. Given the same seed, a simulation produces
//! identical results every run:
//!
//! - No tokio runtime - all execution is synchronous
//! - Simulated time - `run_until()` advances the simulation clock
//! - Scriptable fixtures - APS enqueue verdicts, confirm statuses and
//!   latencies, DDF match verdicts and node contents are all test inputs
//!
//! This is the harness behind the end-to-end scenario tests; production
//! embedding lives in `zigbridge-runtime`.

mod fixtures;
mod runner;

pub use fixtures::{ApsRecord, SimDdf, SimNodes, SimResources, SimulatedAps};
pub use runner::{SimConfig, SimulationRunner, SimulationStats};
