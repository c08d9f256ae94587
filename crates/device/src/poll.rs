//! Poll sub-state machine (level 2).
//!
//! Runs only while the top level is idle. A poll tick collects every
//! sub-device item whose value is stale and whose DDF entry supplies read
//! parameters; the queue is then worked off from the back, one in-flight
//! read at a time, with per-item retry accounting.

use crate::state::{Device, DeviceState};
use std::sync::Arc;
use tracing::{debug, info};
use zigbridge_core::{Action, Event, StateLevel, StateMachine};
use zigbridge_types::{
    ApsResult, ReadParameters, ResourcePrefix, APS_SUCCESS, MAX_POLL_ITEM_RETRIES,
    MIN_MAC_POLL_RX_ON,
};

/// A request to refresh one sub-device attribute via ZCL.
///
/// The sub-device is stored by identity and re-resolved through the
/// resource store on every use; the queue never holds resource handles.
#[derive(Debug, Clone)]
pub struct PollItem {
    pub prefix: ResourcePrefix,
    pub unique_id: String,
    pub suffix: String,
    pub read_parameters: ReadParameters,
    pub retry: usize,
}

impl Device {
    /// Returns all items which are ready for polling.
    ///
    /// The returned vector is reversed so the queue's logical head sits at
    /// the end and consumption can pop from the back.
    fn collect_poll_items(&self) -> Vec<PollItem> {
        let mut result = Vec::new();
        let now = self.now();

        for sub in self.sub_devices() {
            for item in sub.items() {
                if !item.needs_refresh(now) {
                    continue;
                }

                let Some(params) = self.services().ddf.read_parameters(&sub, item.suffix()) else {
                    continue;
                };
                if params.is_empty() {
                    continue;
                }

                result.push(PollItem {
                    prefix: sub.prefix(),
                    unique_id: sub.unique_id().to_string(),
                    suffix: item.suffix().to_string(),
                    read_parameters: params,
                    retry: 0,
                });
            }
        }

        result.reverse();
        result
    }

    /// Waits for a poll tick, collects poll-worthy items into the queue.
    pub(crate) fn poll_idle_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                debug!(key = %self.key(), "poll idle");
            }
            Event::Poll => {
                self.poll_items = self.collect_poll_items();

                if !self.poll_items.is_empty() {
                    self.set_state(Some(DeviceState::PollNext), StateLevel::Poll, actions);
                }
            }
            _ => {}
        }
    }

    /// Processes the next poll item and moves to PollBusy.
    ///
    /// An unreachable device drops the whole queue; an empty queue returns
    /// to PollIdle. Items without a read function are discarded in-state.
    pub(crate) fn poll_next_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. }
            | Event::StateTimeout {
                level: StateLevel::Poll,
            } => {
                if !self.reachable() {
                    self.poll_items.clear();
                }

                loop {
                    let Some((prefix, unique_id, suffix, params)) =
                        self.poll_items.last().map(|p| {
                            (
                                p.prefix,
                                p.unique_id.clone(),
                                p.suffix.clone(),
                                p.read_parameters.clone(),
                            )
                        })
                    else {
                        self.set_state(Some(DeviceState::PollIdle), StateLevel::Poll, actions);
                        return;
                    };

                    let Some(read_fn) = self.services().ddf.read_function(&params) else {
                        info!(key = %self.key(), item = %suffix, "poll: no read function for item");
                        self.poll_items.pop();
                        continue;
                    };

                    let resolved = self
                        .services()
                        .resources
                        .resource(prefix, &unique_id)
                        .and_then(|sub| sub.item(&suffix).map(|item| (sub, item)));
                    let Some((sub, item)) = resolved else {
                        debug!(key = %self.key(), item = %suffix, "poll: sub-device gone, dropping item");
                        self.poll_items.pop();
                        continue;
                    };

                    let aps = Arc::clone(&self.services().aps);
                    self.pending_read = read_fn(&sub, &item, &*aps, &params);

                    if self.pending_read.enqueued {
                        self.set_state(Some(DeviceState::PollBusy), StateLevel::Poll, actions);
                    } else {
                        info!(key = %self.key(), item = %suffix, "poll: failed to enqueue read");
                        if let Some(poll) = self.poll_items.last_mut() {
                            poll.retry += 1;
                            if poll.retry >= MAX_POLL_ITEM_RETRIES {
                                self.poll_items.pop();
                            }
                        }
                        // try again after the response window
                        actions.push(Action::SetTimer {
                            level: StateLevel::Poll,
                            duration: MIN_MAC_POLL_RX_ON,
                        });
                    }
                    return;
                }
            }
            Event::StateLeave { .. } => {
                actions.push(Action::CancelTimer {
                    level: StateLevel::Poll,
                });
            }
            _ => {}
        }
    }

    /// Waits for the APS confirm or the timeout of an in-flight read.
    ///
    /// Either way control moves back to PollNext; a successful confirm
    /// removes the item, a failed one charges a retry.
    pub(crate) fn poll_busy_state(&mut self, event: &Event, actions: &mut Vec<Action>) {
        match event {
            Event::StateEnter { .. } => {
                actions.push(Action::SetTimer {
                    level: StateLevel::Poll,
                    duration: MIN_MAC_POLL_RX_ON,
                });
            }
            Event::StateLeave { .. } => {
                actions.push(Action::CancelTimer {
                    level: StateLevel::Poll,
                });
            }
            Event::ApsConfirm { request_id, status }
                if self.pending_read.enqueued && *request_id == self.pending_read.aps_req_id =>
            {
                debug!(key = %self.key(), status, "poll: APS confirm");
                debug_assert!(!self.poll_items.is_empty());

                if *status == APS_SUCCESS {
                    self.poll_items.pop();
                } else if let Some(poll) = self.poll_items.last_mut() {
                    poll.retry += 1;
                    if poll.retry >= MAX_POLL_ITEM_RETRIES {
                        self.poll_items.pop();
                    }
                }
                self.pending_read = ApsResult::default();
                self.set_state(Some(DeviceState::PollNext), StateLevel::Poll, actions);
            }
            Event::StateTimeout {
                level: StateLevel::Poll,
            } => {
                // the next iteration decides whether to retry
                self.set_state(Some(DeviceState::PollNext), StateLevel::Poll, actions);
            }
            _ => {}
        }
    }
}
