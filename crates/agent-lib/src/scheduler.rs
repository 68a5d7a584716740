//! Periodic driver for collection cycles
//!
//! At most one cycle is in flight: a tick that fires while the previous
//! cycle is still running is dropped. Failed cycles are not retried early,
//! the next tick simply tries again.

use crate::cycle::CollectionCycle;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default cycle cadence
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default time an in-flight cycle gets to finish on shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Default)]
struct SchedulerShared {
    in_flight: AtomicBool,
    stopped: AtomicBool,
    cycles_started: AtomicU64,
    ticks_skipped: AtomicU64,
}

/// Clears the in-flight flag when the cycle task ends, aborted or not
struct InFlightGuard(Arc<SchedulerShared>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// Read-only view of a scheduler, usable after `run` consumed it
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        if self.shared.stopped.load(Ordering::Acquire) {
            SchedulerState::Stopped
        } else if self.shared.in_flight.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn cycles_started(&self) -> u64 {
        self.shared.cycles_started.load(Ordering::Relaxed)
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.shared.ticks_skipped.load(Ordering::Relaxed)
    }
}

pub struct Scheduler {
    cycle: Arc<CollectionCycle>,
    config: SchedulerConfig,
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    pub fn new(cycle: Arc<CollectionCycle>, config: SchedulerConfig) -> Self {
        Self {
            cycle,
            config,
            shared: Arc::new(SchedulerShared::default()),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Drive cycles until `shutdown` fires or its sender is dropped
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            namespace = %self.cycle.scope(),
            "Starting collection scheduler"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut current: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.try_start_cycle() {
                        Some(handle) => current = Some(handle),
                        None => {
                            self.shared.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                            self.cycle.metrics().inc_ticks_skipped();
                            debug!("Previous cycle still running, skipping tick");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down collection scheduler");
                    break;
                }
            }
        }

        if let Some(mut handle) = current.filter(|h| !h.is_finished()) {
            if tokio::time::timeout(self.config.shutdown_grace, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    grace_secs = self.config.shutdown_grace.as_secs(),
                    "Abandoning in-flight collection cycle"
                );
                handle.abort();
                let _ = handle.await;
            }
        }

        self.shared.stopped.store(true, Ordering::Release);
    }

    /// Spawn a cycle unless one is already in flight
    fn try_start_cycle(&self) -> Option<JoinHandle<()>> {
        if self
            .shared
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let guard = InFlightGuard(self.shared.clone());
        let cycle = self.cycle.clone();
        self.shared.cycles_started.fetch_add(1, Ordering::Relaxed);

        Some(tokio::spawn(async move {
            let _guard = guard;
            // Failures are logged and counted inside the cycle
            if let Err(e) = cycle.run_once().await {
                debug!(error = %e, "Collection cycle aborted");
            }
        }))
    }
}
