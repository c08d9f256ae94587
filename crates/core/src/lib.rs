//! Event and action model of the device control core.
//!
//! This crate provides the contract between the per-device state machines
//! and their runners:
//!
//! - [`Event`]: All possible inputs to a device state machine
//! - [`Action`]: All possible outputs from a device state machine
//! - [`StateLevel`]: The three parallel state machine levels per device
//! - [`StateMachine`]: The trait every device state machine implements
//!
//! # Architecture
//!
//! The core is built on a simple event-driven model:
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: No async, no .await
//! - **Deterministic**: Same state + event = same actions
//! - **Pure-ish**: Mutates self, but performs no I/O of its own
//!
//! All timer and mailbox I/O is handled by the runner (simulation or
//! runtime) which:
//! 1. Delivers events to the state machine
//! 2. Executes the returned actions
//! 3. Converts timer expiries and enqueued events back into deliveries
//!
//! Synchronous collaborators whose answers feed directly into transition
//! decisions (APS enqueue results, node reads, resource reads, DDF item
//! lookups) are injected as trait objects and used only from the event
//! thread; their async counterparts (confirms, responses, DDF match
//! verdicts) arrive as events.

mod action;
mod event;
mod traits;

pub use action::Action;
pub use event::{Event, StateLevel, STATE_LEVEL_COUNT};
pub use traits::StateMachine;
