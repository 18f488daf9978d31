//! # Background Launch Worker
//!
//! Runs a launch on a tokio task so the caller stays responsive through the
//! hook start-up and the process wait. Everything the launch has to say comes
//! back over one channel, in the order it happened:
//!
//! - any number of [`WorkerEvent::Progress`] lines,
//! - at most one [`WorkerEvent::Presence`] (only after a successful launch),
//! - exactly one [`WorkerEvent::Done`], always last.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::launcher::{LaunchError, LaunchReport, LaunchRequest, Launcher};
use crate::presence::PresencePayload;
use crate::system::ProcessController;
use crate::tuning::TuningReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Succeeded,
    FailedNoHook,
    FailedSpawn,
    FailedTimeout,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub outcome: LaunchOutcome,
    pub message: String,
    pub presence: Option<PresencePayload>,
    pub tuning: Option<TuningReport>,
}

impl WorkerResult {
    pub fn success(&self) -> bool {
        self.outcome == LaunchOutcome::Succeeded
    }

    fn from_launch(result: Result<LaunchReport, LaunchError>) -> Self {
        match result {
            Ok(report) => {
                debug!("Launch via hook pid {} finished", report.hook_pid);
                Self {
                    outcome: LaunchOutcome::Succeeded,
                    message: "Done.".to_string(),
                    presence: report.presence,
                    tuning: Some(report.tuning),
                }
            }
            Err(e) => {
                let outcome = match &e {
                    LaunchError::NoHook => LaunchOutcome::FailedNoHook,
                    LaunchError::Spawn(_) => LaunchOutcome::FailedSpawn,
                    LaunchError::Timeout { waited, .. } => {
                        debug!("Gave up after {:.1}s", waited.as_secs_f32());
                        LaunchOutcome::FailedTimeout
                    }
                    LaunchError::Cancelled => LaunchOutcome::Cancelled,
                };
                Self {
                    outcome,
                    message: e.to_string(),
                    presence: None,
                    tuning: None,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Progress(String),
    Presence(PresencePayload),
    Done(WorkerResult),
}

pub struct LaunchHandle {
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LaunchHandle {
    /// Ask the worker to stop waiting for the game. A launch already past the wait finishes.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// The next event, or `None` once `Done` has been delivered and the worker has exited.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Wait for the worker task itself to exit. Call after `Done`.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Launch worker ended abnormally: {}", e);
        }
    }

    /// Drain events until the terminal result.
    #[cfg(test)]
    pub async fn finish(mut self) -> Option<WorkerResult> {
        while let Some(event) = self.next_event().await {
            if let WorkerEvent::Done(result) = event {
                self.join().await;
                return Some(result);
            }
        }
        None
    }
}

pub fn spawn<P>(launcher: Arc<Launcher<P>>, request: LaunchRequest) -> LaunchHandle
where
    P: ProcessController + 'static,
{
    let (tx, events) = mpsc::unbounded_channel();
    let (cancel, mut cancel_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let progress_tx = tx.clone();
        let result = launcher
            .launch(
                &request,
                move |line| {
                    let _ = progress_tx.send(WorkerEvent::Progress(line));
                },
                &mut cancel_rx,
            )
            .await;

        let result = WorkerResult::from_launch(result);
        if let Some(payload) = &result.presence {
            let _ = tx.send(WorkerEvent::Presence(payload.clone()));
        }
        let _ = tx.send(WorkerEvent::Done(result));
    });

    LaunchHandle {
        events,
        cancel,
        task,
    }
}
