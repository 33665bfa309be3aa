//! Event loop that owns the coordinator, plus the cloneable handle every
//! other component uses to reach it.

use shift_tracker_protocol::{SamplerEvent, TrackingConfig};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::coordinator::{Collaborators, Command, Coordinator, Inbound};
use crate::error::{Result, TrackerError};
use crate::session::SessionView;
use crate::types::{Shift, StopReason};

/// Bound on flushing queued work at shutdown; a sampler or store that never
/// answers must not keep the process alive.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Build a coordinator and run it on the current tokio runtime.
pub fn spawn(
    deps: Collaborators,
    config: TrackerConfig,
) -> Result<(CoordinatorHandle, JoinHandle<()>)> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(deps, config, sender.clone())?;
    let view = coordinator.subscribe();
    let task = tokio::spawn(run(coordinator, receiver));
    Ok((CoordinatorHandle { sender, view }, task))
}

/// Reconcile with the sampler, then process inputs one at a time until a
/// shutdown request. Queued writes and commands are flushed before exit.
pub async fn run(mut coordinator: Coordinator, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
    coordinator.reconcile_on_startup();
    info!("Tracking coordinator ready");

    loop {
        let deadline = coordinator.verification_deadline();
        let pending = coordinator.has_pending_tasks();

        let next = tokio::select! {
            inbound = inbox.recv() => match inbound {
                Some(Inbound::Shutdown) | None => break,
                Some(inbound) => inbound,
            },
            Some(inbound) = coordinator.join_next_task(), if pending => inbound,
            attempt = wait_for(deadline) => Inbound::VerificationExpired { attempt },
        };

        coordinator.handle(next);
    }

    if tokio::time::timeout(SHUTDOWN_DRAIN, coordinator.drain_pending())
        .await
        .is_err()
    {
        warn!("Pending sampler or store work did not finish before shutdown");
    }
    coordinator.shutdown();
    info!("Tracking coordinator stopped");
}

async fn wait_for(deadline: Option<(u64, Instant)>) -> u64 {
    match deadline {
        Some((attempt, at)) => {
            tokio::time::sleep_until(at).await;
            attempt
        }
        None => std::future::pending().await,
    }
}

#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::UnboundedSender<Inbound>,
    view: watch::Receiver<SessionView>,
}

impl CoordinatorHandle {
    pub async fn start_tracking(&self, shift: Shift, config: Option<TrackingConfig>) -> Result<()> {
        let (reply, wait) = oneshot::channel();
        self.command(Command::StartTracking {
            shift,
            config,
            reply,
        })?;
        wait.await.map_err(|_| TrackerError::CoordinatorClosed)?
    }

    pub async fn stop_tracking(&self, reason: StopReason) -> Result<()> {
        let (reply, wait) = oneshot::channel();
        self.command(Command::StopTracking { reason, reply })?;
        wait.await.map_err(|_| TrackerError::CoordinatorClosed)
    }

    pub async fn update_config(&self, config: TrackingConfig) -> Result<()> {
        let (reply, wait) = oneshot::channel();
        self.command(Command::UpdateConfig { config, reply })?;
        wait.await.map_err(|_| TrackerError::CoordinatorClosed)?
    }

    pub async fn clear_error(&self) -> Result<()> {
        let (reply, wait) = oneshot::channel();
        self.command(Command::ClearError { reply })?;
        wait.await.map_err(|_| TrackerError::CoordinatorClosed)
    }

    pub async fn snapshot(&self) -> Result<SessionView> {
        let (reply, wait) = oneshot::channel();
        self.command(Command::Snapshot { reply })?;
        wait.await.map_err(|_| TrackerError::CoordinatorClosed)
    }

    pub fn sampler_event(&self, event: SamplerEvent) -> Result<()> {
        self.send(Inbound::Sampler(event))
    }

    pub fn shift_changed(&self, previous: Option<Shift>, current: Option<Shift>) -> Result<()> {
        self.send(Inbound::ShiftChanged { previous, current })
    }

    pub fn service_died(&self) -> Result<()> {
        self.send(Inbound::ServiceDied)
    }

    pub fn woke_on_move(&self) -> Result<()> {
        self.send(Inbound::WokeOnMove)
    }

    /// Latest published session view; updates after every processed input.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn shutdown(&self) {
        if self.sender.send(Inbound::Shutdown).is_err() {
            debug!("Coordinator already stopped");
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.send(Inbound::Command(command))
    }

    fn send(&self, inbound: Inbound) -> Result<()> {
        self.sender
            .send(inbound)
            .map_err(|_| TrackerError::CoordinatorClosed)
    }
}
