//! Direction reversal sequencing
//!
//! The motor must be at rest before its direction changes. Reversing a
//! spinning fan therefore stops it, waits a fixed settle time, then applies
//! the new direction together with the speed it had before. A stopped fan is
//! reversed immediately.
//!
//! A reversal is pending from the moment the stop write is issued, first
//! while the motor is stopping, then while it settles. It can be cancelled
//! in either phase. Whether the deadline or a cancellation wins is decided
//! by whoever removes the pending entry first, under one lock, so exactly
//! one of the two outcomes happens. Every write that changes direction is
//! conditional on the motor being at rest in a read taken under the same
//! link lock.

use fansync_core::{DeviceStatus, Direction, FanSyncError, Result, StateUpdate, SPEED_OFF};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::polling::PollingCoordinator;
use crate::shutdown::ShutdownHooks;

/// A reversal waiting for the motor to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingReversal {
    pub target: Direction,
    pub restore_speed: u8,
    pub deadline: Instant,
}

impl PendingReversal {
    /// Time left until the reversal is applied
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Result of a direction change request
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DirectionOutcome {
    /// The fan was stopped and now turns the requested way
    Applied(DeviceStatus),
    /// The motor was stopped; the reversal happens at the deadline
    Scheduled(PendingReversal),
    /// Already turning the requested way
    Unchanged(DeviceStatus),
    /// Another command cancelled the reversal before the motor had stopped
    Cancelled,
}

enum Phase {
    /// Stop write in flight
    Stopping,
    /// Motor stopped, waiting for the deadline
    Settling {
        reversal: PendingReversal,
        cancel: oneshot::Sender<()>,
    },
}

struct Pending {
    id: u64,
    target: Direction,
    phase: Phase,
}

/// Sequences stop, settle, and reverse for one fan
pub(crate) struct DirectionSequencer {
    coordinator: Arc<PollingCoordinator>,
    settle: Duration,
    pending: Mutex<Option<Pending>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    progress: watch::Sender<Option<PendingReversal>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl DirectionSequencer {
    /// Build a sequencer and register its cancellation with `hooks`
    pub fn new(
        coordinator: Arc<PollingCoordinator>,
        settle: Duration,
        hooks: &ShutdownHooks,
    ) -> Arc<Self> {
        let (progress, _) = watch::channel(None);
        let sequencer = Arc::new(Self {
            coordinator,
            settle,
            pending: Mutex::new(None),
            worker: Mutex::new(None),
            progress,
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&sequencer);
        hooks.register("direction-sequencer", move || {
            if let Some(sequencer) = weak.upgrade() {
                sequencer.shutdown();
            }
        });

        sequencer
    }

    /// The reversal currently waiting for its deadline, if any
    pub fn pending(&self) -> Option<PendingReversal> {
        *self.progress.borrow()
    }

    /// Receive a value each time a reversal is scheduled or cleared
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<Option<PendingReversal>> {
        self.progress.subscribe()
    }

    /// Turn the fan the requested way, stopping and settling first if it spins
    ///
    /// A request for a different direction than a pending reversal cancels
    /// it. A request for the same direction returns the pending schedule, or
    /// is refused while the fan is still being stopped for it.
    pub async fn request(self: &Arc<Self>, target: Direction) -> Result<DirectionOutcome> {
        let superseded = {
            let mut pending = self.lock_pending();
            let existing = pending.as_ref().map(|p| {
                let scheduled = match &p.phase {
                    Phase::Settling { reversal, .. } => Some(*reversal),
                    Phase::Stopping => None,
                };
                (p.target, scheduled)
            });
            match existing {
                Some((pending_target, Some(reversal))) if pending_target == target => {
                    debug!("Reversal to {} already pending", target.as_str());
                    return Ok(DirectionOutcome::Scheduled(reversal));
                }
                Some((pending_target, None)) if pending_target == target => {
                    return Err(FanSyncError::InvalidInput(format!(
                        "Already stopping the fan to turn {}",
                        target.as_str()
                    )));
                }
                _ => pending.take(),
            }
        };
        if let Some(old) = superseded {
            self.abandon(old);
        }

        let device = self.coordinator.device();
        let current = device.get_status().await?;

        if current.direction() == Some(target) {
            debug!("{} already turning {}", device.name(), target.as_str());
            return Ok(DirectionOutcome::Unchanged(current));
        }

        if !current.is_spinning() {
            let update = StateUpdate::direction(target);
            return match device.set_state_if(&update, |now| !now.is_spinning()).await? {
                Some(status) => {
                    info!("{} direction set to {}", device.name(), target.as_str());
                    self.fast_poll().await;
                    Ok(DirectionOutcome::Applied(status))
                }
                None => Err(FanSyncError::InvalidInput(format!(
                    "{} started spinning; direction left unchanged",
                    device.name()
                ))),
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let displaced = self.lock_pending().replace(Pending {
            id,
            target,
            phase: Phase::Stopping,
        });
        if let Some(old) = displaced {
            self.abandon(old);
        }

        // Skipped if a command cancelled this request while it waited for the link
        let stop = StateUpdate::speed(SPEED_OFF);
        let stopped = match device.set_state_if(&stop, |_| self.is_current(id)).await {
            Ok(stopped) => stopped,
            Err(e) => {
                self.forget(id);
                return Err(e);
            }
        };

        let reversal = PendingReversal {
            target,
            restore_speed: current.speed,
            deadline: Instant::now() + self.settle,
        };
        let cancelled = match stopped.and_then(|_| self.begin_settling(id, reversal)) {
            Some(cancelled) => cancelled,
            None => {
                info!(
                    "Reversal of {} to {} cancelled while stopping",
                    device.name(),
                    target.as_str()
                );
                return Ok(DirectionOutcome::Cancelled);
            }
        };

        let worker = tokio::spawn(self.clone().wait_and_apply(id, reversal, cancelled));
        *self.lock_worker() = Some(worker);
        info!(
            "{} stopped; reversing to {} in {}s",
            device.name(),
            target.as_str(),
            self.settle.as_secs()
        );
        self.fast_poll().await;

        Ok(DirectionOutcome::Scheduled(reversal))
    }

    /// Drop a pending reversal without applying it; no-op when none is pending
    pub fn cancel(&self) {
        let taken = self.lock_pending().take();
        if let Some(pending) = taken {
            self.abandon(pending);
        }
    }

    /// Cancel anything pending and stop any reversal in flight
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cancel();
        if let Some(worker) = self.lock_worker().take() {
            worker.abort();
        }
    }

    fn abandon(&self, pending: Pending) {
        match pending.phase {
            Phase::Stopping => {
                info!(
                    "Cancelled reversal to {} before the fan stopped",
                    pending.target.as_str()
                );
            }
            Phase::Settling { reversal, cancel } => {
                let _ = cancel.send(());
                self.clear_progress(&reversal);
                info!("Cancelled reversal to {}", pending.target.as_str());
            }
        }
    }

    /// Move a stopping request into its settle wait and publish it
    ///
    /// Returns `None` if the request was cancelled meanwhile.
    fn begin_settling(
        &self,
        id: u64,
        reversal: PendingReversal,
    ) -> Option<oneshot::Receiver<()>> {
        let mut pending = self.lock_pending();
        match pending.as_mut() {
            Some(p) if p.id == id && matches!(p.phase, Phase::Stopping) => {
                let (cancel, cancelled) = oneshot::channel();
                p.phase = Phase::Settling { reversal, cancel };
                self.progress.send_replace(Some(reversal));
                Some(cancelled)
            }
            _ => None,
        }
    }

    async fn wait_and_apply(
        self: Arc<Self>,
        id: u64,
        reversal: PendingReversal,
        cancelled: oneshot::Receiver<()>,
    ) {
        let finalizer = ClearOnExit {
            sequencer: self.clone(),
            reversal,
        };

        tokio::select! {
            _ = tokio::time::sleep_until(reversal.deadline) => {
                if !self.claim(id) {
                    debug!("Reversal {} cancelled at the deadline", id);
                } else if self.shutting_down.load(Ordering::SeqCst) {
                    return;
                } else {
                    self.apply(reversal).await;
                }
            }
            _ = cancelled => {
                debug!("Reversal {} wait interrupted", id);
            }
        }
        drop(finalizer);

        if !self.shutting_down.load(Ordering::SeqCst) {
            self.fast_poll().await;
        }
    }

    fn is_current(&self, id: u64) -> bool {
        matches!(self.lock_pending().as_ref(), Some(p) if p.id == id)
    }

    /// Take the settling entry if it is still ours
    fn claim(&self, id: u64) -> bool {
        let mut pending = self.lock_pending();
        let ours = matches!(
            pending.as_ref(),
            Some(p) if p.id == id && matches!(p.phase, Phase::Settling { .. })
        );
        if ours {
            pending.take();
        }
        ours
    }

    /// Drop the entry of a request that failed
    fn forget(&self, id: u64) {
        let mut pending = self.lock_pending();
        if matches!(pending.as_ref(), Some(p) if p.id == id) {
            pending.take();
        }
    }

    async fn apply(&self, reversal: PendingReversal) {
        let device = self.coordinator.device();
        let update = StateUpdate::direction(reversal.target).with_speed(reversal.restore_speed);
        match device.set_state_if(&update, |now| !now.is_spinning()).await {
            Ok(Some(status)) => info!(
                "{} reversed to {} at speed {}",
                device.name(),
                reversal.target.as_str(),
                status.speed
            ),
            Ok(None) => warn!(
                "{} is spinning again; reversal to {} skipped",
                device.name(),
                reversal.target.as_str()
            ),
            Err(e) => warn!(
                "Failed to apply reversal to {} on {}: {}",
                reversal.target.as_str(),
                device.name(),
                e
            ),
        }
    }

    async fn fast_poll(&self) {
        if let Err(e) = self.coordinator.start_fast_poll().await {
            debug!("Fast poll after direction change failed: {}", e);
        }
    }

    /// Clear the published reversal if it is still `reversal`
    fn clear_progress(&self, reversal: &PendingReversal) {
        self.progress.send_if_modified(|progress| {
            if progress.as_ref() == Some(reversal) {
                *progress = None;
                true
            } else {
                false
            }
        });
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Clears the published reversal when the waiting task ends, however it ends
struct ClearOnExit {
    sequencer: Arc<DirectionSequencer>,
    reversal: PendingReversal,
}

impl Drop for ClearOnExit {
    fn drop(&mut self) {
        // A newer reversal may have been published meanwhile; it is left alone
        self.sequencer.clear_progress(&self.reversal);
    }
}
