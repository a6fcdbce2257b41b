//! Status polling with slow and fast cadences
//!
//! In the steady state the fan is polled on a long interval and the link is
//! released after every poll so other central devices can reach the fan.
//! Issuing a command switches to a short burst of fast polls that keeps the
//! link open, then drops back to the slow cadence.

use fansync_core::{DeviceStatus, FanSyncError, PollingConfig};
use fansync_hardware::FanDevice;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

/// Current polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum PollMode {
    #[default]
    Slow,
    Fast,
}

impl PollMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollMode::Slow => "slow",
            PollMode::Fast => "fast",
        }
    }
}

/// Latest known state, published to every subscriber
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LatestStatus {
    /// Last successfully polled status
    pub status: Option<DeviceStatus>,
    /// False once consecutive failures reach the threshold
    pub available: bool,
    pub consecutive_failures: u32,
    pub mode: PollMode,
}

impl Default for LatestStatus {
    fn default() -> Self {
        Self {
            status: None,
            available: true,
            consecutive_failures: 0,
            mode: PollMode::Slow,
        }
    }
}

/// A failed poll
#[derive(Debug, thiserror::Error)]
pub(crate) enum PollError {
    /// Below the failure threshold; the next poll may well succeed
    #[error("Poll failed ({failures}/{threshold}): {source}")]
    Transient {
        failures: u32,
        threshold: u32,
        #[source]
        source: FanSyncError,
    },
    /// At or above the failure threshold; the device is reported unavailable
    #[error("Device unavailable after {failures} consecutive failed polls: {source}")]
    Reported {
        failures: u32,
        #[source]
        source: FanSyncError,
    },
}

#[derive(Debug, Default)]
struct PollCycle {
    mode: PollMode,
    fast_remaining: u32,
    consecutive_failures: u32,
}

/// Drives status polls and owns the polling state machine
pub(crate) struct PollingCoordinator {
    device: Arc<FanDevice>,
    config: PollingConfig,
    cycle: Mutex<PollCycle>,
    latest: watch::Sender<LatestStatus>,
    rearm: Notify,
}

impl PollingCoordinator {
    pub fn new(device: Arc<FanDevice>, config: PollingConfig) -> Self {
        let (latest, _) = watch::channel(LatestStatus::default());
        Self {
            device,
            config,
            cycle: Mutex::new(PollCycle::default()),
            latest,
            rearm: Notify::new(),
        }
    }

    pub fn device(&self) -> &Arc<FanDevice> {
        &self.device
    }

    /// Receive every update of the latest known state
    pub fn subscribe(&self) -> watch::Receiver<LatestStatus> {
        self.latest.subscribe()
    }

    /// Copy of the latest known state
    pub fn snapshot(&self) -> LatestStatus {
        self.latest.borrow().clone()
    }

    /// Poll the device once on the current cadence
    ///
    /// This is the scheduled tick: during a fast burst it uses up one cycle.
    pub async fn poll_once(&self) -> Result<DeviceStatus, PollError> {
        let mut cycle = self.cycle.lock().await;
        self.poll_locked(&mut cycle, true).await
    }

    /// Read the device on demand without touching the burst count
    ///
    /// Failures still count toward the unavailable threshold.
    pub async fn refresh(&self) -> Result<DeviceStatus, PollError> {
        let mut cycle = self.cycle.lock().await;
        self.poll_locked(&mut cycle, false).await
    }

    /// Enter a fast burst and poll immediately
    ///
    /// Calling this again during a burst re-arms the full burst count. The
    /// immediate poll is in addition to the burst.
    pub async fn start_fast_poll(&self) -> Result<DeviceStatus, PollError> {
        let result = {
            let mut cycle = self.cycle.lock().await;
            cycle.mode = PollMode::Fast;
            cycle.fast_remaining = self.config.fast_cycles;
            debug!(
                "Fast polling {} ({} cycles)",
                self.device.name(),
                self.config.fast_cycles
            );
            self.poll_locked(&mut cycle, false).await
        };
        self.rearm.notify_one();
        result
    }

    /// Interval until the next scheduled poll
    pub async fn interval(&self) -> Duration {
        match self.cycle.lock().await.mode {
            PollMode::Slow => self.config.slow_interval(),
            PollMode::Fast => self.config.fast_interval(),
        }
    }

    /// Run the poll loop until `stop` flips to true
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        info!(
            "Poll loop started for {} (slow={}s, fast={}s)",
            self.device.name(),
            self.config.slow_interval_secs,
            self.config.fast_interval_secs
        );

        loop {
            let interval = self.interval().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    // Failures are logged where they are counted
                    let _ = self.poll_once().await;
                }
                _ = self.rearm.notified() => {
                    debug!("Poll timer rearmed");
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Poll loop stopped");
    }

    async fn poll_locked(
        &self,
        cycle: &mut PollCycle,
        counts_toward_burst: bool,
    ) -> Result<DeviceStatus, PollError> {
        match self.device.get_status().await {
            Ok(status) => {
                cycle.consecutive_failures = 0;

                if cycle.mode == PollMode::Fast && counts_toward_burst {
                    cycle.fast_remaining = cycle.fast_remaining.saturating_sub(1);
                    if cycle.fast_remaining == 0 {
                        cycle.mode = PollMode::Slow;
                        debug!("Reverting to slow poll for {}", self.device.name());
                    }
                }

                // The link stays open for the rest of a fast burst
                if cycle.mode == PollMode::Slow {
                    self.device.disconnect().await;
                }

                self.publish(Some(status), true, cycle);
                Ok(status)
            }
            Err(source) => {
                cycle.consecutive_failures += 1;
                let failures = cycle.consecutive_failures;
                let threshold = self.config.failure_threshold;

                // Start the next attempt from a clean link
                self.device.disconnect().await;

                if failures >= threshold {
                    error!(
                        "Polling {} failed {} times in a row: {}",
                        self.device.name(),
                        failures,
                        source
                    );
                    self.publish(None, false, cycle);
                    Err(PollError::Reported { failures, source })
                } else {
                    warn!(
                        "Polling {} failed ({}/{}): {}",
                        self.device.name(),
                        failures,
                        threshold,
                        source
                    );
                    let available = self.latest.borrow().available;
                    self.publish(None, available, cycle);
                    Err(PollError::Transient {
                        failures,
                        threshold,
                        source,
                    })
                }
            }
        }
    }

    fn publish(&self, status: Option<DeviceStatus>, available: bool, cycle: &PollCycle) {
        self.latest.send_if_modified(|latest| {
            let next = LatestStatus {
                status: status.or(latest.status),
                available,
                consecutive_failures: cycle.consecutive_failures,
                mode: cycle.mode,
            };
            if *latest == next {
                return false;
            }
            *latest = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fansync_core::protocol::Command;
    use fansync_hardware::{LinkManager, ReplyMode, SimulatedFan};

    fn coordinator_for(fan: &SimulatedFan) -> Arc<PollingCoordinator> {
        let device = FanDevice::new(LinkManager::new(Arc::new(fan.clone())), "Test Fan");
        Arc::new(PollingCoordinator::new(
            Arc::new(device),
            PollingConfig::default(),
        ))
    }

    fn status_polls(fan: &SimulatedFan) -> usize {
        fan.received_commands()
            .into_iter()
            .filter(|c| *c == Command::GetStatus as u8)
            .count()
    }

    fn spinning() -> DeviceStatus {
        DeviceStatus {
            speed: 2,
            downlight: 50,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_slow_poll_publishes_and_disconnects() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);
        let mut updates = coordinator.subscribe();

        let status = coordinator.poll_once().await.unwrap();

        assert_eq!(status, spinning());
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().status, Some(spinning()));
        assert!(!fan.is_connected());
        assert_eq!(fan.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_fast_poll_is_immediate_and_keeps_link() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);

        coordinator.start_fast_poll().await.unwrap();

        assert_eq!(status_polls(&fan), 1);
        assert!(fan.is_connected());
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.mode, PollMode::Fast);
        assert_eq!(snapshot.status, Some(spinning()));
        assert_eq!(coordinator.interval().await, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_burst_then_revert_to_slow() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);
        coordinator.start_fast_poll().await.unwrap();

        for _ in 0..2 {
            coordinator.poll_once().await.unwrap();
            assert_eq!(coordinator.snapshot().mode, PollMode::Fast);
            assert!(fan.is_connected());
        }

        coordinator.poll_once().await.unwrap();
        assert_eq!(coordinator.snapshot().mode, PollMode::Slow);
        assert!(!fan.is_connected());
        assert_eq!(coordinator.interval().await, Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_follows_burst_timing() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(coordinator.clone().run(stop_rx));

        coordinator.start_fast_poll().await.unwrap();
        assert_eq!(status_polls(&fan), 1);

        // Three polls one second apart
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(status_polls(&fan), 4);
        assert_eq!(coordinator.snapshot().mode, PollMode::Slow);
        assert!(!fan.is_connected());

        // Then nothing until the slow interval elapses
        tokio::time::sleep(Duration::from_secs(290)).await;
        assert_eq!(status_polls(&fan), 4);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(status_polls(&fan), 5);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_during_burst_keeps_fast_cycles() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(coordinator.clone().run(stop_rx));

        coordinator.start_fast_poll().await.unwrap();
        coordinator.refresh().await.unwrap();
        assert_eq!(status_polls(&fan), 2);
        assert_eq!(coordinator.snapshot().mode, PollMode::Fast);
        assert!(fan.is_connected());

        // All three timed fast polls still run
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(status_polls(&fan), 4);
        assert_eq!(coordinator.snapshot().mode, PollMode::Fast);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(status_polls(&fan), 5);
        assert_eq!(coordinator.snapshot().mode, PollMode::Slow);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_in_slow_mode_releases_link() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);

        assert_eq!(coordinator.refresh().await.unwrap(), spinning());
        assert!(!fan.is_connected());
        assert_eq!(coordinator.snapshot().mode, PollMode::Slow);
    }

    #[tokio::test]
    async fn test_restart_during_burst_rearms_count() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);

        coordinator.start_fast_poll().await.unwrap();
        coordinator.poll_once().await.unwrap();
        coordinator.poll_once().await.unwrap();
        coordinator.start_fast_poll().await.unwrap();

        for _ in 0..2 {
            coordinator.poll_once().await.unwrap();
            assert_eq!(coordinator.snapshot().mode, PollMode::Fast);
        }
        coordinator.poll_once().await.unwrap();
        assert_eq!(coordinator.snapshot().mode, PollMode::Slow);
    }

    #[tokio::test]
    async fn test_failures_reported_at_threshold() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);
        coordinator.poll_once().await.unwrap();
        fan.set_absent(true);

        for expected in 1..=2 {
            match coordinator.poll_once().await {
                Err(PollError::Transient { failures, .. }) => assert_eq!(failures, expected),
                other => panic!("expected transient failure, got {:?}", other),
            }
            // A failure under the threshold is invisible to observers
            assert!(coordinator.snapshot().available);
        }

        match coordinator.poll_once().await {
            Err(PollError::Reported { failures, source }) => {
                assert_eq!(failures, 3);
                assert!(matches!(source, FanSyncError::DeviceNotFound(_)));
            }
            other => panic!("expected reported failure, got {:?}", other),
        }
        let snapshot = coordinator.snapshot();
        assert!(!snapshot.available);
        // Last good status is kept
        assert_eq!(snapshot.status, Some(spinning()));

        fan.set_absent(false);
        coordinator.poll_once().await.unwrap();
        let snapshot = coordinator.snapshot();
        assert!(snapshot.available);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_success_below_threshold_resets_counter() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);

        fan.set_absent(true);
        for _ in 0..2 {
            assert!(matches!(
                coordinator.poll_once().await,
                Err(PollError::Transient { .. })
            ));
        }
        fan.set_absent(false);
        coordinator.poll_once().await.unwrap();
        assert_eq!(coordinator.snapshot().consecutive_failures, 0);

        fan.set_absent(true);
        for _ in 0..2 {
            assert!(matches!(
                coordinator.poll_once().await,
                Err(PollError::Transient { .. })
            ));
        }
        assert!(coordinator.snapshot().available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_forces_disconnect() {
        let fan = SimulatedFan::new(spinning());
        let coordinator = coordinator_for(&fan);
        coordinator.start_fast_poll().await.unwrap();
        assert!(fan.is_connected());

        fan.set_reply_mode(ReplyMode::Silent);
        let result = coordinator.poll_once().await;

        assert!(matches!(
            result,
            Err(PollError::Transient {
                source: FanSyncError::NoReply(_),
                ..
            })
        ));
        assert!(!fan.is_connected());
        // A failed poll does not consume the burst
        assert_eq!(coordinator.snapshot().mode, PollMode::Fast);
    }
}
