//! Ordered command channel to the sampler.
//!
//! Commands are dispatched by one consumer task in the order they were
//! queued. Most are fire-and-forget; `submit` hands back a receiver for the
//! dispatch result, as `start` needs. A `stop` queued while a `start` is
//! still being dispatched abandons that start so the stop is not stuck
//! behind it.

use shift_tracker_protocol::SamplerCommand;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, TrackerError};
use crate::ports::Sampler;

enum Outgoing {
    Command {
        command: SamplerCommand,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Flush(oneshot::Sender<()>),
}

pub struct SamplerOutbox {
    sender: mpsc::UnboundedSender<Outgoing>,
    worker: JoinHandle<()>,
}

impl SamplerOutbox {
    pub fn spawn(sampler: Arc<dyn Sampler>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_outbox(sampler, receiver));
        Self { sender, worker }
    }

    pub fn send(&self, command: SamplerCommand) {
        let name = command.name();
        if self
            .sender
            .send(Outgoing::Command {
                command,
                reply: None,
            })
            .is_err()
        {
            warn!(command = name, "Sampler outbox is gone; dropping command");
        }
    }

    /// Queue `command` and return a receiver for its dispatch result. The
    /// receiver errors if the outbox shuts down before dispatching.
    pub fn submit(&self, command: SamplerCommand) -> oneshot::Receiver<Result<()>> {
        let (reply, receipt) = oneshot::channel();
        let name = command.name();
        if self
            .sender
            .send(Outgoing::Command {
                command,
                reply: Some(reply),
            })
            .is_err()
        {
            warn!(command = name, "Sampler outbox is gone; dropping command");
        }
        receipt
    }

    /// Wait until every command queued so far has been dispatched.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Outgoing::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

impl Drop for SamplerOutbox {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_outbox(sampler: Arc<dyn Sampler>, mut receiver: mpsc::UnboundedReceiver<Outgoing>) {
    let mut backlog = VecDeque::new();
    loop {
        let outgoing = match backlog.pop_front() {
            Some(outgoing) => outgoing,
            None => match receiver.recv().await {
                Some(outgoing) => outgoing,
                None => break,
            },
        };

        match outgoing {
            Outgoing::Command { command, reply } => {
                let name = command.name();
                let result = match command {
                    SamplerCommand::Start(_) => {
                        dispatch_start(sampler.as_ref(), command, &mut receiver, &mut backlog)
                            .await
                    }
                    other => sampler.dispatch(other).await,
                };
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            warn!(error = %err, command = name, "Sampler command failed");
                        }
                    }
                }
            }
            Outgoing::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Dispatch a start while still accepting the queue. Anything queued in the
/// meantime waits in `backlog`; a stop abandons the start.
async fn dispatch_start(
    sampler: &dyn Sampler,
    command: SamplerCommand,
    receiver: &mut mpsc::UnboundedReceiver<Outgoing>,
    backlog: &mut VecDeque<Outgoing>,
) -> Result<()> {
    let dispatch = sampler.dispatch(command);
    tokio::pin!(dispatch);
    let mut open = true;

    loop {
        tokio::select! {
            result = &mut dispatch => return result,
            next = receiver.recv(), if open => match next {
                Some(outgoing) => {
                    let stop = matches!(
                        outgoing,
                        Outgoing::Command { command: SamplerCommand::Stop, .. }
                    );
                    backlog.push_back(outgoing);
                    if stop {
                        info!("Stop queued behind an unanswered start; abandoning the start");
                        return Err(TrackerError::StartCancelled(
                            "stop requested".to_string(),
                        ));
                    }
                }
                None => open = false,
            },
        }
    }
}
