//! Timer management for the gateway runner.
//!
//! Every armed `(device, level)` pair owns at most one tokio task that
//! sleeps for the requested duration and then delivers the timeout event
//! into the gateway mailbox. Re-arming cancels the previous task.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use zigbridge_core::{Event, StateLevel};
use zigbridge_types::DeviceKey;

use crate::runner::GatewayCommand;
use std::time::Duration;

/// Manages the per-device, per-level single-shot timers.
pub struct TimerManager {
    /// Active timers ((device, level) -> task handle).
    timers: HashMap<(DeviceKey, StateLevel), JoinHandle<()>>,
    /// Command sender for timer fires.
    command_tx: mpsc::UnboundedSender<GatewayCommand>,
}

impl TimerManager {
    pub fn new(command_tx: mpsc::UnboundedSender<GatewayCommand>) -> Self {
        Self {
            timers: HashMap::new(),
            command_tx,
        }
    }

    /// Arm the timer of one device level.
    ///
    /// An already armed timer for the same pair is cancelled first, so at
    /// most one firing is ever pending per level.
    pub fn set_timer(&mut self, key: DeviceKey, level: StateLevel, duration: Duration) {
        self.cancel_timer(key, level);

        let command_tx = self.command_tx.clone();
        let handle = tokio::spawn(async move {
            trace!(%key, ?level, ?duration, "timer task sleeping");
            tokio::time::sleep(duration).await;
            let _ = command_tx.send(GatewayCommand::Deliver {
                key,
                event: Event::StateTimeout { level },
            });
        });

        self.timers.insert((key, level), handle);
        debug!(%key, ?level, ?duration, "timer set");
    }

    /// Cancel the timer of one device level.
    ///
    /// A timer that does not exist or already fired is a no-op.
    pub fn cancel_timer(&mut self, key: DeviceKey, level: StateLevel) {
        if let Some(handle) = self.timers.remove(&(key, level)) {
            handle.abort();
            debug!(%key, ?level, "timer cancelled");
        }
    }

    /// Cancel every timer of one device, e.g. on removal.
    pub fn cancel_device(&mut self, key: DeviceKey) {
        self.timers.retain(|(k, _), handle| {
            if *k == key {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Cancel all timers. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for ((key, level), handle) in self.timers.drain() {
            handle.abort();
            trace!(%key, ?level, "timer cancelled (shutdown)");
        }
    }

    /// Number of armed timers.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_for(command: GatewayCommand) -> (DeviceKey, StateLevel) {
        match command {
            GatewayCommand::Deliver {
                key,
                event: Event::StateTimeout { level },
            } => (key, level),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timer_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = TimerManager::new(tx);
        let key = DeviceKey(0xAA);

        manager.set_timer(key, StateLevel::Top, Duration::from_millis(10));

        let command = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert_eq!(timeout_for(command), (key, StateLevel::Top));
    }

    #[tokio::test]
    async fn timer_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = TimerManager::new(tx);
        let key = DeviceKey(0xAB);

        manager.set_timer(key, StateLevel::Poll, Duration::from_millis(50));
        manager.cancel_timer(key, StateLevel::Poll);

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "timer should have been cancelled");
    }

    #[tokio::test]
    async fn rearming_replaces_the_pending_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = TimerManager::new(tx);
        let key = DeviceKey(0xAC);

        manager.set_timer(key, StateLevel::Top, Duration::from_millis(100));
        manager.set_timer(key, StateLevel::Top, Duration::from_millis(10));
        assert_eq!(manager.active_count(), 1);

        // fires quickly (the replacement timer)
        let command = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("timeout - replacement timer didn't fire")
            .expect("channel closed");
        assert_eq!(timeout_for(command), (key, StateLevel::Top));
    }

    #[tokio::test]
    async fn levels_are_independent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = TimerManager::new(tx);
        let key = DeviceKey(0xAD);

        manager.set_timer(key, StateLevel::Top, Duration::from_millis(10));
        manager.set_timer(key, StateLevel::Poll, Duration::from_millis(20));
        assert_eq!(manager.active_count(), 2);

        let first = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        let second = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        let mut levels = vec![timeout_for(first).1, timeout_for(second).1];
        levels.sort();
        assert_eq!(levels, vec![StateLevel::Top, StateLevel::Poll]);
    }

    #[tokio::test]
    async fn cancel_device_drops_all_levels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = TimerManager::new(tx);
        let key = DeviceKey(0xAE);

        manager.set_timer(key, StateLevel::Top, Duration::from_millis(30));
        manager.set_timer(key, StateLevel::Poll, Duration::from_millis(30));
        manager.cancel_device(key);
        assert_eq!(manager.active_count(), 0);

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "no timers should have fired");
    }
}
