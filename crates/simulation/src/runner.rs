//! Deterministic simulation runner.
//!
//! Events are processed from a queue ordered by `(time, sequence)`; both
//! runner and devices observe the same simulated clock. All actions are
//! executed inline, so a whole verification round-trip runs in microseconds
//! of wall time.

use crate::fixtures::{SimDdf, SimNodes, SimResources, SimulatedAps};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use zigbridge_core::{Action, Event, StateLevel, StateMachine};
use zigbridge_device::{Device, DeviceRegistry, DeviceState, Services};
use zigbridge_types::{DeviceKey, SubDevice, Value};

/// Simulation configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Managed gate handed to the registry.
    pub managed: bool,
    /// DDF match verdict for devices without an explicit override.
    pub ddf_matched_default: bool,
    /// Latency of the DDF engine's asynchronous verdict.
    pub ddf_latency: Duration,
    /// Fractional latency jitter applied to scheduled deliveries.
    pub jitter_fraction: f64,
    /// Seed for the jitter RNG; same seed, same run.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            managed: true,
            ddf_matched_default: true,
            ddf_latency: Duration::from_millis(10),
            jitter_fraction: 0.0,
            seed: 42,
        }
    }
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Total actions generated by devices.
    pub actions_generated: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled before firing.
    pub timers_cancelled: u64,
    /// DDF match requests observed.
    pub ddf_requests: u64,
    /// DDF verdicts answered with a match.
    pub ddf_matches: u64,
    /// DDF verdicts answered without a match.
    pub ddf_mismatches: u64,
}

/// Ordering key of the simulation event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EventKey {
    time: Duration,
    seq: u64,
}

/// Deterministic simulation runner.
pub struct SimulationRunner {
    registry: DeviceRegistry,
    aps: Arc<SimulatedAps>,
    nodes: Arc<SimNodes>,
    resources: Arc<SimResources>,
    ddf: Arc<SimDdf>,

    /// Global event queue, ordered deterministically.
    queue: BTreeMap<EventKey, (DeviceKey, Event)>,
    /// Armed timers, for cancellation and re-arm support.
    timers: HashMap<(DeviceKey, StateLevel), EventKey>,
    sequence: u64,
    now: Duration,
    rng: ChaCha8Rng,
    config: SimConfig,
    stats: SimulationStats,
}

impl SimulationRunner {
    pub fn new(config: SimConfig) -> Self {
        let aps = Arc::new(SimulatedAps::new());
        let nodes = Arc::new(SimNodes::new());
        let resources = Arc::new(SimResources::new());
        let ddf = Arc::new(SimDdf::new(config.ddf_matched_default));

        let services = Arc::new(Services {
            aps: Arc::clone(&aps) as _,
            nodes: Arc::clone(&nodes) as _,
            resources: Arc::clone(&resources) as _,
            ddf: Arc::clone(&ddf) as _,
        });

        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        Self {
            registry: DeviceRegistry::new(services, config.managed),
            aps,
            nodes,
            resources,
            ddf,
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            rng,
            config,
            stats: SimulationStats::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fixture access
    // ═══════════════════════════════════════════════════════════════════════

    pub fn aps(&self) -> &SimulatedAps {
        &self.aps
    }

    pub fn nodes(&self) -> &SimNodes {
        &self.nodes
    }

    pub fn resources(&self) -> &SimResources {
        &self.resources
    }

    pub fn ddf(&self) -> &SimDdf {
        &self.ddf
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Setup helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a device and feed its startup actions through the queue.
    pub fn create_device(&mut self, key: DeviceKey) {
        let (_, actions) = self.registry.get_or_create(key);
        for action in actions {
            self.process_action(key, action);
        }
    }

    pub fn remove_device(&mut self, key: DeviceKey) -> bool {
        self.registry.remove(key)
    }

    pub fn device(&self, key: DeviceKey) -> Option<&Device> {
        self.registry.get(key)
    }

    /// The state installed at one level of a device.
    pub fn device_state(&self, key: DeviceKey, level: StateLevel) -> Option<DeviceState> {
        self.registry.get(key).and_then(|d| d.state(level))
    }

    /// Register a sub-device in the store and attach it to a device.
    pub fn attach_sub_device(&mut self, key: DeviceKey, sub: Arc<SubDevice>) {
        self.resources.insert(Arc::clone(&sub));
        if let Some(device) = self.registry.get_mut(key) {
            device.add_sub_device(&sub);
        }
    }

    /// Set a device-owned item, as the parse layer would after a response.
    pub fn set_device_item(&mut self, key: DeviceKey, suffix: &str, value: Value) -> bool {
        let now = self.now;
        match self.registry.get_mut(key) {
            Some(device) => {
                device.set_time(now);
                device.set_item_value(suffix, value)
            }
            None => false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event flow
    // ═══════════════════════════════════════════════════════════════════════

    /// Schedule an event for a device after a delay.
    pub fn schedule(&mut self, key: DeviceKey, delay: Duration, event: Event) {
        let time = self.now + delay;
        self.push(key, time, event);
    }

    fn push(&mut self, key: DeviceKey, time: Duration, event: Event) -> EventKey {
        let qk = EventKey {
            time,
            seq: self.sequence,
        };
        self.sequence += 1;
        self.queue.insert(qk, (key, event));
        qk
    }

    fn jittered(&mut self, base: Duration) -> Duration {
        if self.config.jitter_fraction <= 0.0 {
            return base;
        }
        let jitter = base.as_secs_f64() * self.config.jitter_fraction * self.rng.gen::<f64>();
        base + Duration::from_secs_f64(jitter)
    }

    /// Run the simulation until no more events are due or the time limit
    /// is reached. The clock ends up at `end`.
    pub fn run_until(&mut self, end: Duration) {
        while let Some((&qk, _)) = self.queue.first_key_value() {
            if qk.time > end {
                break;
            }

            let (qk, (device_key, event)) = self.queue.pop_first().expect("peeked entry");
            if qk.time > self.now {
                self.now = qk.time;
            }

            trace!(time = ?self.now, key = %device_key, event = event.type_name(), "processing event");

            // drop the bookkeeping of a timer that just fired
            if let Event::StateTimeout { level } = &event {
                if self.timers.get(&(device_key, *level)) == Some(&qk) {
                    self.timers.remove(&(device_key, *level));
                }
            }

            // the DDF engine observes match requests on the mailbox
            if event == Event::DdfInitRequest {
                self.stats.ddf_requests += 1;
                let matched = self.ddf.matched(device_key);
                if matched {
                    self.stats.ddf_matches += 1;
                } else {
                    self.stats.ddf_mismatches += 1;
                }
                let delay = self.jittered(self.config.ddf_latency);
                self.schedule(device_key, delay, Event::DdfInitResponse { matched });
            }

            self.stats.events_processed += 1;
            let actions = self.registry.dispatch(device_key, &event, self.now);
            self.stats.actions_generated += actions.len() as u64;

            for action in actions {
                self.process_action(device_key, action);
            }

            // confirms generated by APS calls during the handler
            let outbox = self.aps.take_outbox();
            for (delay, confirm) in outbox {
                let delay = self.jittered(delay);
                self.schedule(device_key, delay, confirm);
            }
        }

        if end > self.now {
            self.now = end;
        }
    }

    /// Run for a duration relative to the current clock.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        self.run_until(end);
    }

    fn process_action(&mut self, key: DeviceKey, action: Action) {
        match action {
            Action::SetTimer { level, duration } => {
                // re-arming cancels the previous firing
                if let Some(old) = self.timers.remove(&(key, level)) {
                    self.queue.remove(&old);
                }
                let time = self.now + duration;
                let qk = self.push(key, time, Event::StateTimeout { level });
                self.timers.insert((key, level), qk);
                self.stats.timers_set += 1;
            }
            Action::CancelTimer { level } => {
                if let Some(old) = self.timers.remove(&(key, level)) {
                    self.queue.remove(&old);
                    self.stats.timers_cancelled += 1;
                }
            }
            Action::EnqueueInternal { event } => {
                self.push(key, self.now, event);
            }
        }
    }
}
