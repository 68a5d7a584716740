//! Supervision and ordered shutdown of the agent's long-running tasks
//!
//! Shutdown stops the scheduler first and waits for it, so a cycle that
//! finishes inside the grace period is still published and scrapeable.
//! Only then is the metrics server told to drain and close its listener.

use crate::exposition::{self, AppState};
use crate::health::{components, HealthRegistry};
use crate::observability::StructuredLogger;
use crate::scheduler::Scheduler;
use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};

/// Slack on top of the scheduler's own grace before it is given up on
pub const SCHEDULER_STOP_MARGIN: Duration = Duration::from_secs(1);

/// Why the agent left its serving state
#[derive(Debug)]
pub enum AgentExit {
    /// Interrupt received; a clean exit
    Interrupted,
    /// A task ended on its own or the interrupt could not be awaited
    Failed(anyhow::Error),
}

/// Whether each task finished within its shutdown bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub scheduler_stopped: bool,
    pub server_stopped: bool,
}

/// Handles to the running scheduler and metrics server
pub struct AgentTasks {
    scheduler_stop: broadcast::Sender<()>,
    scheduler: Option<JoinHandle<()>>,
    server_stop: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Result<()>>>,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl AgentTasks {
    /// Spawn the scheduler and the metrics server, each with its own stop signal
    pub fn spawn(
        scheduler: Scheduler,
        listener: TcpListener,
        state: Arc<AppState>,
        logger: StructuredLogger,
    ) -> Self {
        let (scheduler_stop, scheduler_rx) = broadcast::channel(1);
        let scheduler_task = tokio::spawn(scheduler.run(scheduler_rx));

        let (server_stop, server_rx) = oneshot::channel();
        let health = state.health_registry.clone();
        let server_task = tokio::spawn(exposition::serve(listener, state, async move {
            let _ = server_rx.await;
        }));

        Self::new(
            scheduler_stop,
            scheduler_task,
            server_stop,
            server_task,
            health,
            logger,
        )
    }

    pub fn new(
        scheduler_stop: broadcast::Sender<()>,
        scheduler: JoinHandle<()>,
        server_stop: oneshot::Sender<()>,
        server: JoinHandle<Result<()>>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            scheduler_stop,
            scheduler: Some(scheduler),
            server_stop: Some(server_stop),
            server: Some(server),
            health,
            logger,
        }
    }

    /// Wait for `interrupt` or for either task to end early.
    ///
    /// A task that ends before the interrupt marks its component unhealthy.
    pub async fn wait<F>(&mut self, interrupt: F) -> AgentExit
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let (Some(scheduler), Some(server)) = (self.scheduler.as_mut(), self.server.as_mut())
        else {
            return AgentExit::Failed(anyhow!("Agent tasks are not running"));
        };

        enum Woken {
            Interrupt(std::io::Result<()>),
            Scheduler(std::result::Result<(), tokio::task::JoinError>),
            Server(std::result::Result<Result<()>, tokio::task::JoinError>),
        }

        let woken = tokio::select! {
            signal = interrupt => Woken::Interrupt(signal),
            result = scheduler => Woken::Scheduler(result),
            result = server => Woken::Server(result),
        };

        match woken {
            Woken::Interrupt(Ok(())) => {
                self.logger.log_shutdown("SIGINT received");
                AgentExit::Interrupted
            }
            Woken::Interrupt(Err(e)) => AgentExit::Failed(
                anyhow::Error::new(e).context("Failed to listen for interrupt signal"),
            ),
            Woken::Scheduler(result) => {
                self.scheduler = None;
                self.health
                    .set_unhealthy(components::SCHEDULER, "collection scheduler stopped")
                    .await;
                AgentExit::Failed(match result {
                    Ok(()) => anyhow!("Collection scheduler stopped unexpectedly"),
                    Err(e) => anyhow::Error::new(e).context("Collection scheduler task panicked"),
                })
            }
            Woken::Server(result) => {
                self.server = None;
                self.health
                    .set_unhealthy(components::EXPOSITION, "metrics server stopped")
                    .await;
                AgentExit::Failed(match result {
                    Ok(Ok(())) => anyhow!("Metrics server stopped unexpectedly"),
                    Ok(Err(e)) => e,
                    Err(e) => anyhow::Error::new(e).context("Metrics server task panicked"),
                })
            }
        }
    }

    /// Stop the scheduler, wait for it, then stop the server.
    ///
    /// The scheduler bounds its own in-flight cycle by `grace`; the outer
    /// wait adds [`SCHEDULER_STOP_MARGIN`] so it never fires first. The
    /// server then gets `grace` to drain.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        let _ = self.scheduler_stop.send(());
        let scheduler_bound = grace + SCHEDULER_STOP_MARGIN;
        let scheduler_stopped = match self.scheduler.take() {
            Some(task) => match timeout(scheduler_bound, task).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(error = %e, "Collection scheduler task panicked");
                    true
                }
                Err(_) => {
                    self.logger
                        .log_shutdown_timeout(components::SCHEDULER, scheduler_bound);
                    false
                }
            },
            None => true,
        };

        if let Some(stop) = self.server_stop.take() {
            let _ = stop.send(());
        }
        let server_stopped = match self.server.take() {
            Some(task) => match timeout(grace, task).await {
                Ok(Ok(Ok(()))) => true,
                Ok(Ok(Err(e))) => {
                    error!(error = %e, "Metrics server failed during shutdown");
                    true
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Metrics server task panicked");
                    true
                }
                Err(_) => {
                    self.logger.log_shutdown_timeout(components::EXPOSITION, grace);
                    false
                }
            },
            None => true,
        };

        info!(scheduler_stopped, server_stopped, "Shutdown complete");
        ShutdownReport {
            scheduler_stopped,
            server_stopped,
        }
    }
}
