//! Periodic invocation trigger
//!
//! Runs the queue worker on a fixed interval inside a tokio event loop, with
//! graceful shutdown on SIGTERM/SIGINT. The worker itself has no dependency on
//! this module; any cron-style runner can call `process_queue` instead.

use crate::worker::{QueueSummary, QueueWorker};
use crate::{PostboxError, Result};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

/// Default event channel capacity
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the scheduler
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Event loop started
    Started { interval: Duration },

    /// An invocation finished
    InvocationCompleted(QueueSummary),

    /// An invocation could not reach its settings or store
    InvocationFailed { message: String },

    /// Event loop stopped
    Stopped { invocations: u64 },
}

/// Commands that can be sent to a running scheduler
#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    /// Run an invocation now without waiting for the next tick
    ProcessNow,

    /// Change the tick interval
    SetInterval(Duration),

    /// Stop the event loop
    Shutdown,
}

/// Result of handling a command
enum CommandResult {
    Continue,
    Stop,
}

/// Drives a [`QueueWorker`] on an interval
pub struct Scheduler {
    worker: QueueWorker,
    interval: Duration,
    event_tx: broadcast::Sender<SchedulerEvent>,
    command_rx: Option<mpsc::Receiver<SchedulerCommand>>,
    command_tx: mpsc::Sender<SchedulerCommand>,
    invocations: u64,
}

impl Scheduler {
    /// Create a scheduler ticking at the worker's configured poll interval
    pub fn new(worker: QueueWorker) -> Self {
        let interval = worker.config().poll_interval;
        let (event_tx, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(10);

        Self {
            worker,
            interval,
            event_tx,
            command_rx: Some(command_rx),
            command_tx,
            invocations: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of invocations run so far
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Get an event subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// Get a command sender
    pub fn command_sender(&self) -> mpsc::Sender<SchedulerCommand> {
        self.command_tx.clone()
    }

    fn send_event(&self, event: SchedulerEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Scheduler event sent but no receivers subscribed");
        }
    }

    /// Run the event loop until a shutdown command or signal
    pub async fn run(&mut self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(PostboxError::Config(
                "Scheduler interval must be greater than 0".to_string(),
            ));
        }

        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| PostboxError::Config("Scheduler already running".to_string()))?;

        let mut ticker = new_ticker(self.interval);
        tracing::info!(interval_secs = self.interval.as_secs(), "Scheduler started");
        self.send_event(SchedulerEvent::Started {
            interval: self.interval,
        });

        #[cfg(unix)]
        self.run_with_signals(&mut ticker, &mut command_rx).await?;

        #[cfg(not(unix))]
        self.run_without_signals(&mut ticker, &mut command_rx).await;

        tracing::info!(invocations = self.invocations, "Scheduler stopped");
        self.send_event(SchedulerEvent::Stopped {
            invocations: self.invocations,
        });
        Ok(())
    }

    #[cfg(unix)]
    async fn run_with_signals(
        &mut self,
        ticker: &mut tokio::time::Interval,
        command_rx: &mut mpsc::Receiver<SchedulerCommand>,
    ) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            PostboxError::Other(format!("Failed to set up SIGTERM handler: {}", e))
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            PostboxError::Other(format!("Failed to set up SIGINT handler: {}", e))
        })?;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.invoke().await;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let CommandResult::Stop = self.handle_command(cmd, ticker).await {
                                break;
                            }
                        }
                        None => {
                            tracing::debug!("Command channel closed");
                            break;
                        }
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    break;
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                    break;
                }
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn run_without_signals(
        &mut self,
        ticker: &mut tokio::time::Interval,
        command_rx: &mut mpsc::Receiver<SchedulerCommand>,
    ) {
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.invoke().await;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let CommandResult::Stop = self.handle_command(cmd, ticker).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        cmd: SchedulerCommand,
        ticker: &mut tokio::time::Interval,
    ) -> CommandResult {
        match cmd {
            SchedulerCommand::ProcessNow => {
                self.invoke().await;
            }
            SchedulerCommand::SetInterval(interval) => {
                if interval.is_zero() {
                    tracing::warn!("Ignoring zero scheduler interval");
                } else {
                    tracing::info!(interval_secs = interval.as_secs(), "Scheduler interval changed");
                    *ticker = new_ticker(interval);
                    self.interval = interval;
                }
            }
            SchedulerCommand::Shutdown => {
                tracing::info!("Received shutdown command");
                return CommandResult::Stop;
            }
        }
        CommandResult::Continue
    }

    /// Run one invocation and publish its result
    async fn invoke(&mut self) {
        self.invocations += 1;
        match self.worker.process_queue().await {
            Ok(summary) => self.send_event(SchedulerEvent::InvocationCompleted(summary)),
            Err(e) => self.send_event(SchedulerEvent::InvocationFailed {
                message: e.to_string(),
            }),
        }
    }
}

/// An interval that skips ticks missed while an invocation overran
fn new_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
