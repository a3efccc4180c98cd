//! Direct work: the worker computes the task itself.
//!
//! A [`Work`] implementation receives a [`WorkContext`] through which it reports
//! progress and, at each [`checkpoint`](WorkContext::checkpoint), honours pause
//! and terminate requests.

use super::machine::{Control, ExitGuard, ProcessHandle};
use super::ProcessError;
use crate::model::{Status, Task};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[async_trait]
pub trait Work: Send + Sync + 'static {
    /// Performs the work. `Ok` carries the completion message.
    ///
    /// Return [`ProcessError::Interrupted`] (usually via `ctx.checkpoint().await?`)
    /// when a termination request stops the work.
    async fn execute(&self, ctx: &mut WorkContext) -> Result<String, ProcessError>;
}

pub struct WorkContext {
    handle: ProcessHandle,
    control: watch::Receiver<Control>,
}

impl WorkContext {
    pub(crate) fn new(handle: ProcessHandle) -> Self {
        let control = handle.control();
        Self { handle, control }
    }

    pub fn task(&self) -> Task {
        self.handle.snapshot()
    }

    /// Broadcasts RUNNING with the given progress.
    pub fn progress(&self, percent: f64, message: &str) -> Result<(), ProcessError> {
        self.handle
            .broadcast(Status::Running, Some(percent), Some(message))?;
        Ok(())
    }

    /// Returns immediately while running, waits while paused, and fails with
    /// [`ProcessError::Interrupted`] once termination has been requested.
    pub async fn checkpoint(&mut self) -> Result<(), ProcessError> {
        loop {
            let control = *self.control.borrow_and_update();
            match control {
                Control::Terminate => return Err(ProcessError::Interrupted),
                Control::Run => {
                    if matches!(self.handle.status(), Status::Paused | Status::RequestResume) {
                        self.handle
                            .broadcast(Status::Running, None, Some("Resumed"))?;
                    }
                    return Ok(());
                }
                Control::Pause => {
                    if self.handle.status() != Status::Paused {
                        self.handle.broadcast(Status::Paused, None, Some("Paused"))?;
                    }
                    if self.control.changed().await.is_err() {
                        return Err(ProcessError::Interrupted);
                    }
                }
            }
        }
    }
}

/// Runs direct work to a terminal status. `guard` releases the process on exit.
pub(crate) async fn run_direct(work: Arc<dyn Work>, guard: ExitGuard) {
    let handle = guard.0.clone();
    let task_id = handle.id();
    if let Err(e) = handle.broadcast(Status::Running, Some(0.0), Some("Started")) {
        handle.fail(&format!("Could not report start: {e}"));
        return;
    }

    let mut ctx = WorkContext::new(handle.clone());
    let result = match handle.deadline() {
        Some(limit) => match tokio::time::timeout(limit, work.execute(&mut ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ProcessError::Timeout { after: limit }),
        },
        None => work.execute(&mut ctx).await,
    };

    let settled = match result {
        Ok(message) => handle.broadcast(Status::Complete, Some(100.0), Some(&message)),
        Err(ProcessError::Interrupted) => {
            handle.broadcast(Status::Terminated, None, Some("Terminated on request"))
        }
        Err(e) => {
            warn!(%task_id, error = %e, "Work failed");
            handle.broadcast(Status::Failed, None, Some(&e.to_string()))
        }
    };
    match settled {
        Ok(true) => info!(%task_id, status = %handle.status(), "Work settled"),
        Ok(false) => info!(%task_id, status = %handle.status(), "Task was already settled"),
        Err(e) => warn!(%task_id, error = %e, "Final status could not be published"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;
    use crate::fabric::{ChannelFabric, InMemoryBroker};
    use crate::model::{Payload, ScanRequest};
    use crate::process::{CommandOutcome, Process, WorkStrategy};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Reports one step, then loops on checkpoints until released.
    struct Gate {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Work for Gate {
        async fn execute(&self, ctx: &mut WorkContext) -> Result<String, ProcessError> {
            ctx.progress(10.0, "step 1")?;
            loop {
                tokio::select! {
                    _ = self.release.notified() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => ctx.checkpoint().await?,
                }
            }
            ctx.checkpoint().await?;
            Ok("gate passed".into())
        }
    }

    struct Broken;

    #[async_trait]
    impl Work for Broken {
        async fn execute(&self, _ctx: &mut WorkContext) -> Result<String, ProcessError> {
            Err(ProcessError::Work("detector offline".into()))
        }
    }

    fn process(work: Arc<dyn Work>, options: ProcessConfig) -> Process {
        let fabric = ChannelFabric::new(Arc::new(InMemoryBroker::new()));
        let topic = fabric.open_status_topic("mem", "S").unwrap();
        let task = Task::new("t", Payload::Scan(ScanRequest::new("x", vec![1.0])));
        Process::new(task, topic, WorkStrategy::Direct(work), &options)
    }

    async fn wait_for_status(handle: &ProcessHandle, status: Status) {
        while handle.status() != status {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn work_completes_with_its_message() {
        let release = Arc::new(Notify::new());
        release.notify_one();
        let p = process(Arc::new(Gate { release }), ProcessConfig::default());
        let task = p.run().await;
        assert_eq!(task.status, Status::Complete);
        assert_eq!(task.percent_complete, 100.0);
        assert_eq!(task.message, "gate passed");
    }

    #[tokio::test]
    async fn pause_and_resume_settle_through_checkpoints() {
        let release = Arc::new(Notify::new());
        let p = process(Arc::new(Gate { release: release.clone() }), ProcessConfig::default());
        let h = p.handle();
        let run = tokio::spawn(p.run());

        wait_for_status(&h, Status::Running).await;
        assert_eq!(h.pause().unwrap(), CommandOutcome::Applied);
        wait_for_status(&h, Status::Paused).await;
        assert_eq!(h.resume().unwrap(), CommandOutcome::Applied);
        wait_for_status(&h, Status::Running).await;

        release.notify_one();
        let task = run.await.unwrap();
        assert_eq!(task.status, Status::Complete);
    }

    #[tokio::test]
    async fn terminate_stops_paused_work() {
        let p = process(Arc::new(Gate { release: Arc::new(Notify::new()) }), ProcessConfig::default());
        let h = p.handle();
        let run = tokio::spawn(p.run());

        wait_for_status(&h, Status::Running).await;
        h.pause().unwrap();
        wait_for_status(&h, Status::Paused).await;
        assert_eq!(h.terminate().unwrap(), CommandOutcome::Applied);

        let task = run.await.unwrap();
        assert_eq!(task.status, Status::Terminated);
        assert_eq!(h.terminate().unwrap(), CommandOutcome::Stale);
    }

    #[tokio::test]
    async fn work_error_ends_failed_with_cause() {
        let task = process(Arc::new(Broken), ProcessConfig::default()).run().await;
        assert_eq!(task.status, Status::Failed);
        assert_eq!(task.message, "detector offline");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fails_slow_work() {
        let options = ProcessConfig {
            blocking: true,
            deadline: Some(Duration::from_secs(1)),
        };
        let p = process(Arc::new(Gate { release: Arc::new(Notify::new()) }), options);
        let h = p.handle();
        let task = p.run().await;
        assert_eq!(task.status, Status::Failed);
        assert!(task.message.starts_with("Timed out"), "{}", task.message);
        assert!(h.is_released());
    }

    #[tokio::test]
    async fn non_blocking_run_returns_before_completion() {
        let release = Arc::new(Notify::new());
        let options = ProcessConfig {
            blocking: false,
            deadline: None,
        };
        let p = process(Arc::new(Gate { release: release.clone() }), options);
        let h = p.handle();
        let early = p.run().await;
        assert!(!early.status.is_terminal());

        release.notify_one();
        let done = h.wait_terminal(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(done.status, Status::Complete);
    }
}
