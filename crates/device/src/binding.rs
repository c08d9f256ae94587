//! Binding sub-state machine (level 1).
//!
//! Runs only while the top level is idle. A verification pass walks the
//! node's binding table one entry per `BindingTick`, re-queuing the tick
//! through the mailbox so the device can interleave other events.

use crate::state::{Device, DeviceState};
use std::time::Duration;
use tracing::{debug, info};
use zigbridge_core::{Action, Event, StateLevel, StateMachine};
use zigbridge_types::{BindingDestination, BINDING_VERIFY_INTERVAL, ZDP_NOT_SUPPORTED, ZDP_SUCCESS};

/// Per-device binding verification context.
#[derive(Debug, Default)]
pub(crate) struct BindingContext {
    /// When the binding table was last fully verified, if ever.
    pub verified_at: Option<Duration>,
    /// Cursor into the node's binding table.
    pub iter: usize,
    /// Whether the remote answered a Mgmt_Bind_req at all.
    pub mgmt_bind_supported: bool,
}

impl Device {
    /// Waits for the next verification window.
    pub(crate) fn binding_idle_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                debug!(key = %self.key(), "binding idle");
            }
            Event::Poll | Event::Awake => {
                let due = match self.binding.verified_at {
                    None => true,
                    Some(at) => self.now().saturating_sub(at) > BINDING_VERIFY_INTERVAL,
                };
                if !due {
                    return;
                }

                info!(key = %self.key(), "verify bindings");
                self.binding.iter = 0;
                self.set_state(
                    Some(DeviceState::BindingTableVerify),
                    StateLevel::Binding,
                    actions,
                );
                actions.push(Action::EnqueueInternal {
                    event: Event::BindingTick,
                });
            }
            Event::BindingTable { status } => {
                // informational for now; future passes may gate on it
                if *status == ZDP_SUCCESS {
                    self.binding.mgmt_bind_supported = true;
                } else if *status == ZDP_NOT_SUPPORTED {
                    self.binding.mgmt_bind_supported = false;
                }
            }
            _ => {}
        }
    }

    /// Walks the binding table, one entry per tick.
    pub(crate) fn binding_table_verify_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        if *event != Event::BindingTick {
            return;
        }

        let table_len = self
            .node()
            .map(|node| node.binding_count())
            .unwrap_or(0);

        if self.binding.iter >= table_len {
            self.binding.verified_at = Some(self.now());
            self.set_state(Some(DeviceState::BindingIdle), StateLevel::Binding, actions);
            return;
        }

        if let Some(bnd) = self.node().and_then(|node| node.binding_at(self.binding.iter)) {
            let age_secs = bnd
                .confirmed_at
                .map(|at| self.now().saturating_sub(at).as_secs() as i64)
                .unwrap_or(-1);

            match bnd.destination {
                BindingDestination::Extended { address, endpoint } => {
                    info!(
                        src = bnd.src_address,
                        cluster = bnd.cluster_id,
                        dst = address,
                        dst_endpoint = endpoint,
                        age_secs,
                        "binding"
                    );
                }
                BindingDestination::Group { group } => {
                    info!(
                        src = bnd.src_address,
                        cluster = bnd.cluster_id,
                        group,
                        age_secs,
                        "binding"
                    );
                }
            }
        }

        self.binding.iter += 1;
        actions.push(Action::EnqueueInternal {
            event: Event::BindingTick,
        });
    }

    /// Whether the remote is known to answer Mgmt_Bind_req.
    pub fn mgmt_bind_supported(&self) -> bool {
        self.binding.mgmt_bind_supported
    }

    /// When the binding table was last fully verified.
    pub fn binding_verified_at(&self) -> Option<Duration> {
        self.binding.verified_at
    }
}
