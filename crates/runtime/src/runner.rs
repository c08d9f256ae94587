//! Gateway runner: the tokio event loop around the device registry.

use crate::metrics::Metrics;
use crate::timers::TimerManager;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zigbridge_core::{Action, Event, StateLevel};
use zigbridge_device::{DeviceRegistry, DeviceState, Services};
use zigbridge_types::{item, DeviceKey};

/// Errors from the gateway runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("command channel closed")]
    ChannelClosed,
    #[error("inspect reply dropped")]
    ReplyDropped,
}

/// Asynchronous device description matching.
///
/// Called on a blocking task so thousands of description files can be
/// lazy loaded; the verdict is delivered back into the mailbox as a
/// `DdfInitResponse` event.
pub trait DdfEngine: Send + Sync {
    fn match_device(&self, key: DeviceKey, manufacturer: &str, model: &str) -> bool;
}

/// Commands accepted by the runner.
#[derive(Debug)]
pub enum GatewayCommand {
    /// A lower layer announced a device key; create it if unknown.
    CreateDevice { key: DeviceKey },
    /// Remove a device, detaching its sub-devices.
    RemoveDevice { key: DeviceKey },
    /// Deliver one event to one device.
    Deliver { key: DeviceKey, event: Event },
    /// Snapshot a device's state for diagnostics.
    Inspect {
        key: DeviceKey,
        reply: oneshot::Sender<Option<DeviceSnapshot>>,
    },
}

/// Diagnostic snapshot of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub top: Option<DeviceState>,
    pub binding: Option<DeviceState>,
    pub poll: Option<DeviceState>,
    pub reachable: bool,
    pub poll_queue_len: usize,
}

/// Handle for feeding the runner from other tasks.
#[derive(Clone)]
pub struct GatewayHandle {
    command_tx: mpsc::UnboundedSender<GatewayCommand>,
}

impl GatewayHandle {
    pub fn create_device(&self, key: DeviceKey) -> Result<(), RunnerError> {
        self.command_tx
            .send(GatewayCommand::CreateDevice { key })
            .map_err(|_| RunnerError::ChannelClosed)
    }

    pub fn remove_device(&self, key: DeviceKey) -> Result<(), RunnerError> {
        self.command_tx
            .send(GatewayCommand::RemoveDevice { key })
            .map_err(|_| RunnerError::ChannelClosed)
    }

    /// Deliver an event; per-device mailbox order is preserved.
    pub fn deliver(&self, key: DeviceKey, event: Event) -> Result<(), RunnerError> {
        self.command_tx
            .send(GatewayCommand::Deliver { key, event })
            .map_err(|_| RunnerError::ChannelClosed)
    }

    pub async fn inspect(&self, key: DeviceKey) -> Result<Option<DeviceSnapshot>, RunnerError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(GatewayCommand::Inspect { key, reply })
            .map_err(|_| RunnerError::ChannelClosed)?;
        rx.await.map_err(|_| RunnerError::ReplyDropped)
    }
}

/// Handle for shutting down a running [`GatewayRunner`].
///
/// When dropped, signals the runner to exit gracefully.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// The tokio event loop driving all devices.
///
/// The registry and every state machine stay on this single task; other
/// tasks talk to it through [`GatewayHandle`]. Time is monotonic since
/// runner start, so device timestamps are comparable across the fleet.
pub struct GatewayRunner {
    registry: DeviceRegistry,
    timers: TimerManager,
    ddf_engine: Arc<dyn DdfEngine>,
    command_tx: mpsc::UnboundedSender<GatewayCommand>,
    command_rx: mpsc::UnboundedReceiver<GatewayCommand>,
    shutdown_rx: oneshot::Receiver<()>,
    start: Instant,
}

impl GatewayRunner {
    /// Build a runner around the host-provided collaborators.
    ///
    /// `managed` is the process-wide gate for the new control path,
    /// captured once at startup.
    pub fn new(
        services: Arc<Services>,
        ddf_engine: Arc<dyn DdfEngine>,
        managed: bool,
    ) -> (Self, GatewayHandle, ShutdownHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let runner = Self {
            registry: DeviceRegistry::new(services, managed),
            timers: TimerManager::new(command_tx.clone()),
            ddf_engine,
            command_tx: command_tx.clone(),
            command_rx,
            shutdown_rx,
            start: Instant::now(),
        };

        (
            runner,
            GatewayHandle { command_tx },
            ShutdownHandle {
                tx: Some(shutdown_tx),
            },
        )
    }

    /// Spawn the runner onto the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown is signalled or every handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    debug!("gateway runner shutting down");
                    break;
                }
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("all gateway handles dropped");
                        break;
                    };
                    self.process(command);
                }
            }
        }
        self.timers.cancel_all();
    }

    fn process(&mut self, command: GatewayCommand) {
        let metrics = Metrics::global();

        match command {
            GatewayCommand::CreateDevice { key } => {
                let (_, actions) = self.registry.get_or_create(key);
                metrics.devices_registered.set(self.registry.len() as f64);
                for action in actions {
                    self.process_action(key, action);
                }
            }
            GatewayCommand::RemoveDevice { key } => {
                if self.registry.remove(key) {
                    self.timers.cancel_device(key);
                }
                metrics.devices_registered.set(self.registry.len() as f64);
            }
            GatewayCommand::Deliver { key, event } => {
                metrics.events_processed.inc();

                // the DDF engine observes match requests on the mailbox
                if event == Event::DdfInitRequest {
                    self.dispatch_ddf_match(key);
                }

                let now = self.start.elapsed();
                let actions = self.registry.dispatch(key, &event, now);
                metrics.actions_generated.inc_by(actions.len() as f64);

                for action in actions {
                    self.process_action(key, action);
                }

                if self.registry.get(key).map(|d| d.state(StateLevel::Top))
                    == Some(Some(DeviceState::Dead))
                {
                    metrics.devices_dead.set(
                        self.registry
                            .keys()
                            .filter(|k| {
                                self.registry
                                    .get(*k)
                                    .and_then(|d| d.state(StateLevel::Top))
                                    == Some(DeviceState::Dead)
                            })
                            .count() as f64,
                    );
                }
            }
            GatewayCommand::Inspect { key, reply } => {
                let snapshot = self.registry.get(key).map(|device| DeviceSnapshot {
                    top: device.state(StateLevel::Top),
                    binding: device.state(StateLevel::Binding),
                    poll: device.state(StateLevel::Poll),
                    reachable: device.reachable(),
                    poll_queue_len: device.poll_queue_len(),
                });
                let _ = reply.send(snapshot);
            }
        }
    }

    fn process_action(&mut self, key: DeviceKey, action: Action) {
        let metrics = Metrics::global();

        match action {
            Action::SetTimer { level, duration } => {
                self.timers.set_timer(key, level, duration);
                metrics.timers_set.inc();
            }
            Action::CancelTimer { level } => {
                self.timers.cancel_timer(key, level);
            }
            Action::EnqueueInternal { event } => {
                if self
                    .command_tx
                    .send(GatewayCommand::Deliver { key, event })
                    .is_err()
                {
                    warn!(%key, "mailbox closed, dropping internal event");
                }
            }
        }
    }

    /// Run the DDF match off the event loop and feed the verdict back.
    fn dispatch_ddf_match(&self, key: DeviceKey) {
        let Some(device) = self.registry.get(key) else {
            return;
        };
        let manufacturer = device
            .item(item::ATTR_MANUFACTURER_NAME)
            .map(|i| i.to_str().to_string())
            .unwrap_or_default();
        let model = device
            .item(item::ATTR_MODEL_ID)
            .map(|i| i.to_str().to_string())
            .unwrap_or_default();

        let engine = Arc::clone(&self.ddf_engine);
        let command_tx = self.command_tx.clone();
        Metrics::global().ddf_requests.inc();

        tokio::task::spawn_blocking(move || {
            let matched = engine.match_device(key, &manufacturer, &model);
            let _ = command_tx.send(GatewayCommand::Deliver {
                key,
                event: Event::DdfInitResponse { matched },
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zigbridge_types::{
        ApsController, ApsResult, DdfResolver, Node, NodeRegistry, ReadFunction, ReadParameters,
        ResourcePrefix, ResourceStore, SubDevice, ZclReadReq,
    };

    struct NullAps;

    impl ApsController for NullAps {
        fn zdp_node_descriptor_req(&self, _nwk: u16) -> ApsResult {
            ApsResult::default()
        }
        fn zdp_active_endpoints_req(&self, _nwk: u16) -> ApsResult {
            ApsResult::default()
        }
        fn zdp_simple_descriptor_req(&self, _nwk: u16, _endpoint: u8) -> ApsResult {
            ApsResult::default()
        }
        fn zcl_read_attributes(&self, _req: &ZclReadReq, _ext: u64, _nwk: u16) -> ApsResult {
            ApsResult::default()
        }
    }

    struct NullNodes;

    impl NodeRegistry for NullNodes {
        fn get_node(&self, _key: DeviceKey) -> Option<Arc<Node>> {
            None
        }
    }

    struct NullResources;

    impl ResourceStore for NullResources {
        fn resource(&self, _prefix: ResourcePrefix, _unique_id: &str) -> Option<Arc<SubDevice>> {
            None
        }
    }

    struct NullDdf;

    impl DdfResolver for NullDdf {
        fn read_parameters(&self, _sub: &SubDevice, _suffix: &str) -> Option<ReadParameters> {
            None
        }
        fn read_function(&self, _params: &ReadParameters) -> Option<ReadFunction> {
            None
        }
    }

    struct MatchAll;

    impl DdfEngine for MatchAll {
        fn match_device(&self, _key: DeviceKey, _manufacturer: &str, _model: &str) -> bool {
            true
        }
    }

    fn null_services() -> Arc<Services> {
        Arc::new(Services {
            aps: Arc::new(NullAps),
            nodes: Arc::new(NullNodes),
            resources: Arc::new(NullResources),
            ddf: Arc::new(NullDdf),
        })
    }

    #[tokio::test]
    async fn green_power_device_is_parked_dead() {
        let (runner, handle, shutdown) =
            GatewayRunner::new(null_services(), Arc::new(MatchAll), true);
        let join = runner.spawn();

        let key = DeviceKey(0x0000_0000_0000_1234);
        handle.create_device(key).unwrap();

        // let the startup enter event drain through the loop
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = handle.inspect(key).await.unwrap().expect("device exists");
        assert_eq!(snapshot.top, Some(DeviceState::Dead));
        assert_eq!(snapshot.binding, None);
        assert_eq!(snapshot.poll, None);

        shutdown.shutdown();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn device_without_node_stays_in_init() {
        let (runner, handle, shutdown) =
            GatewayRunner::new(null_services(), Arc::new(MatchAll), true);
        let join = runner.spawn();

        let key = DeviceKey(0x0021_2E00_0000_0001);
        handle.create_device(key).unwrap();
        handle.deliver(key, Event::Poll).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = handle.inspect(key).await.unwrap().expect("device exists");
        assert_eq!(snapshot.top, Some(DeviceState::Init));
        assert!(!snapshot.reachable);

        handle.remove_device(key).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.inspect(key).await.unwrap(), None);

        shutdown.shutdown();
        join.await.unwrap();
    }
}
