//! Background replay scheduling.
//!
//! The scheduler owns the replay and status timers and reacts to lifecycle
//! signals from the host (connectivity changes, app foreground/background).
//! Signals arrive over a channel, so hosts and tests drive it the same way;
//! with tokio's paused clock the timers are deterministic too.

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::SyncOrchestrator;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

const SIGNAL_CHANNEL_CAPACITY: usize = 32;

/// App lifecycle transitions reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

/// Inputs to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// Connectivity changed.
    Online(bool),
    /// The app moved to the foreground or background.
    Lifecycle(AppLifecycle),
    /// Replay tick; same as the periodic timer firing.
    Tick,
    /// Status tick; same as the status timer firing.
    StatusTick,
    /// Manual replay requested by the user.
    ForceSync,
    /// Stop the scheduler.
    Shutdown,
}

/// Handle to send signals to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    signal_tx: mpsc::Sender<SyncSignal>,
}

impl SchedulerHandle {
    /// Creates a handle and the receiver a [`Scheduler`] runs on.
    pub fn channel() -> (Self, mpsc::Receiver<SyncSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        (Self { signal_tx }, signal_rx)
    }

    /// Sends a signal to the scheduler.
    pub async fn send(&self, signal: SyncSignal) -> SyncResult<()> {
        self.signal_tx
            .send(signal)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub async fn set_online(&self, online: bool) -> SyncResult<()> {
        self.send(SyncSignal::Online(online)).await
    }

    pub async fn foreground(&self) -> SyncResult<()> {
        self.send(SyncSignal::Lifecycle(AppLifecycle::Foreground))
            .await
    }

    pub async fn background(&self) -> SyncResult<()> {
        self.send(SyncSignal::Lifecycle(AppLifecycle::Background))
            .await
    }

    pub async fn force_sync(&self) -> SyncResult<()> {
        self.send(SyncSignal::ForceSync).await
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(SyncSignal::Shutdown).await
    }

    /// Returns true once the scheduler has stopped.
    pub fn is_closed(&self) -> bool {
        self.signal_tx.is_closed()
    }
}

/// Drives replay passes and status publication for one orchestrator.
///
/// Holds the orchestrator weakly: once the host drops its last reference the
/// scheduler exits at the next timer or signal.
pub struct Scheduler {
    orchestrator: Weak<SyncOrchestrator>,
    sync_interval: Duration,
    status_interval: Duration,
}

impl Scheduler {
    pub fn new(
        orchestrator: &Arc<SyncOrchestrator>,
        sync_interval: Duration,
        status_interval: Duration,
    ) -> Self {
        Self {
            orchestrator: Arc::downgrade(orchestrator),
            sync_interval,
            status_interval,
        }
    }

    /// Runs until a shutdown signal arrives, every handle is dropped, or the
    /// orchestrator is gone.
    pub async fn run(self, mut signal_rx: mpsc::Receiver<SyncSignal>) {
        let start = Instant::now();
        let mut sync_tick = interval_at(start + self.sync_interval, self.sync_interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_tick = interval_at(start + self.status_interval, self.status_interval);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Sync scheduler started (replay every {:?}, status every {:?})",
            self.sync_interval, self.status_interval
        );

        loop {
            let signal = tokio::select! {
                signal = signal_rx.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
                _ = sync_tick.tick() => SyncSignal::Tick,
                _ = status_tick.tick() => SyncSignal::StatusTick,
            };

            if !self.handle(signal).await {
                break;
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Handles one signal. Returns false when the scheduler should stop.
    async fn handle(&self, signal: SyncSignal) -> bool {
        debug!("Scheduler signal: {:?}", signal);
        let Some(orchestrator) = self.orchestrator.upgrade() else {
            debug!("Sync orchestrator dropped, stopping scheduler");
            return false;
        };
        match signal {
            SyncSignal::Shutdown => return false,
            SyncSignal::Online(online) => orchestrator.set_online_status(online).await,
            SyncSignal::Tick => {
                if orchestrator.is_online() {
                    replay_guarded(&orchestrator).await;
                }
            }
            SyncSignal::StatusTick => {
                orchestrator.publish_status().await;
            }
            SyncSignal::Lifecycle(AppLifecycle::Foreground) => {
                replay_guarded(&orchestrator).await;
                orchestrator.publish_status().await;
            }
            SyncSignal::Lifecycle(AppLifecycle::Background) => {
                orchestrator.publish_status().await;
            }
            SyncSignal::ForceSync => {
                orchestrator.force_sync().await;
            }
        }
        true
    }
}

/// Runs a replay pass; a panic inside it must not stop the timers.
async fn replay_guarded(orchestrator: &SyncOrchestrator) {
    let pass = AssertUnwindSafe(orchestrator.replay()).catch_unwind();
    if pass.await.is_err() {
        error!("Replay pass panicked; will retry on the next tick");
    }
}
