//! State machine trait.

use crate::{Action, Event};
use std::time::Duration;

/// A synchronous, deterministic state machine.
///
/// The runner installs the current time before each `handle` call, so the
/// machine never reads a clock of its own and simulated time behaves
/// exactly like wall time.
pub trait StateMachine {
    /// Process one event and return the actions to perform.
    fn handle(&mut self, event: &Event) -> Vec<Action>;

    /// Install the current time (monotonic, since runner start).
    fn set_time(&mut self, now: Duration);

    /// The most recently installed time.
    fn now(&self) -> Duration;
}
