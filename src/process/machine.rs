//! # Process State Machine
//!
//! A [`Process`] owns one task and drives it along the status graph defined by
//! [`Status::can_transition_to`]. The state machine is written once; what the
//! work actually is comes from a [`WorkStrategy`].
//!
//! ## Single mutation path
//!
//! [`ProcessHandle::broadcast`] is the only way a task changes. It validates the
//! transition, applies status/percent/message and publishes the full snapshot
//! while holding the task lock, so subscribers never see a half-applied update
//! and broadcasts of one task are published in the order they were applied.
//!
//! ## Commands
//!
//! Commands arrive on other tasks than the worker (listener callbacks) and go
//! through the same handle. Once the task is terminal every command is
//! discarded with a log line ([`CommandOutcome::Stale`]); nothing resurrects a
//! terminal task.

use super::delegate::Delegation;
use super::work::{self, Work};
use super::{CommandOutcome, ProcessError};
use crate::config::ProcessConfig;
use crate::fabric::{ChannelError, StatusTopic};
use crate::model::{ChildTaskRef, Command, CommandAction, Status, Task};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the work of a process currently should be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Pause,
    Terminate,
}

/// How a process does its work.
pub enum WorkStrategy {
    /// The worker performs the work itself.
    Direct(Arc<dyn Work>),
    /// The work is a child task submitted to another service.
    Delegated(Delegation),
}

impl WorkStrategy {
    fn variant(&self) -> &'static str {
        match self {
            WorkStrategy::Direct(_) => "direct",
            WorkStrategy::Delegated(_) => "delegated",
        }
    }
}

struct State {
    task: Task,
    topic: Option<StatusTopic>,
    child: Option<ChildTaskRef>,
}

struct Shared {
    state: Mutex<State>,
    control: watch::Sender<Control>,
    terminal: watch::Sender<bool>,
    terminate_requested: Arc<AtomicBool>,
    variant: &'static str,
    pausable: bool,
    blocking: bool,
    deadline: Option<Duration>,
}

/// Cloneable access to a running process: commands, snapshots and the completion latch.
#[derive(Clone)]
pub struct ProcessHandle {
    shared: Arc<Shared>,
}

impl ProcessHandle {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.lock().task.id
    }

    pub fn snapshot(&self) -> Task {
        self.lock().task.clone()
    }

    pub fn status(&self) -> Status {
        self.lock().task.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_blocking(&self) -> bool {
        self.shared.blocking
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.shared.deadline
    }

    pub fn variant(&self) -> &'static str {
        self.shared.variant
    }

    /// The delegated child, present only while the process waits on it.
    pub fn child(&self) -> Option<ChildTaskRef> {
        self.lock().child.clone()
    }

    /// True once the status channel of this process has been released.
    pub fn is_released(&self) -> bool {
        self.lock().topic.is_none()
    }

    /// Sets status, percentage and message and publishes the result as one update.
    ///
    /// Returns `Ok(false)` when the update was refused: the task is terminal or
    /// `status` is not reachable from the current status. Percent is clamped to
    /// `[0, 100]` and never decreases.
    ///
    /// The update is committed only once it is published. A terminal update
    /// that cannot be published leaves the task FAILED locally.
    pub fn broadcast(
        &self,
        status: Status,
        percent: Option<f64>,
        message: Option<&str>,
    ) -> Result<bool, ChannelError> {
        let mut state = self.lock();
        let current = state.task.status;
        if current.is_terminal() {
            debug!(task_id = %state.task.id, %current, requested = %status, "Task is terminal, broadcast ignored");
            return Ok(false);
        }
        if !current.can_transition_to(status) {
            warn!(task_id = %state.task.id, from = %current, to = %status, "Rejected status transition");
            return Ok(false);
        }

        let mut next = state.task.clone();
        next.status = status;
        if let Some(percent) = percent {
            next.percent_complete = percent.clamp(0.0, 100.0).max(next.percent_complete);
        }
        if let Some(message) = message {
            next.message = message.to_string();
        }
        debug!(task_id = %next.id, %status, percent = next.percent_complete, message = %next.message, "Broadcast");

        let published = match state.topic.as_ref() {
            Some(topic) => topic.publish(&next),
            None => Err(ChannelError::Disconnected {
                endpoint: format!("status topic of {}", next.id),
            }),
        };
        match published {
            Ok(()) => {
                state.task = next;
                if status.is_terminal() {
                    self.shared.terminal.send_replace(true);
                }
                Ok(true)
            }
            Err(e) => {
                // An unpublished terminal status must not stand locally.
                if status.is_terminal() {
                    state.task.status = Status::Failed;
                    state.task.message = format!("Could not publish {status}: {e}");
                    error!(task_id = %state.task.id, %status, error = %e, "Final status not published, task failed");
                    self.shared.terminal.send_replace(true);
                }
                Err(e)
            }
        }
    }

    /// Marks the task FAILED with `message` unless it is already terminal.
    pub(crate) fn fail(&self, message: &str) {
        if let Err(e) = self.broadcast(Status::Failed, None, Some(message)) {
            error!(task_id = %self.id(), error = %e, "Could not broadcast failure");
        }
    }

    pub fn pause(&self) -> Result<CommandOutcome, ProcessError> {
        self.request(CommandAction::Pause)
    }

    pub fn resume(&self) -> Result<CommandOutcome, ProcessError> {
        self.request(CommandAction::Resume)
    }

    pub fn terminate(&self) -> Result<CommandOutcome, ProcessError> {
        self.request(CommandAction::Terminate)
    }

    /// Applies a command received from a command channel.
    pub fn apply(&self, command: &Command) -> Result<CommandOutcome, ProcessError> {
        self.request(command.action)
    }

    fn request(&self, action: CommandAction) -> Result<CommandOutcome, ProcessError> {
        let task_id = self.id();
        let current = self.status();
        if current.is_terminal() {
            info!(%task_id, ?action, status = %current, "Discarding command for finished task");
            return Ok(CommandOutcome::Stale);
        }

        if action != CommandAction::Terminate && !self.shared.pausable {
            let operation = match action {
                CommandAction::Pause => "pause",
                _ => "resume",
            };
            error!(%task_id, operation, "Pause/resume is not implemented for delegated work");
            return Err(ProcessError::UnsupportedOperation {
                operation,
                variant: self.shared.variant,
            });
        }

        let applied = match (action, current) {
            // Nothing has started yet; there is no work to wind down.
            (CommandAction::Terminate, Status::Submitted | Status::Queued) => self.broadcast(
                Status::Terminated,
                None,
                Some("Terminated before it started"),
            )?,
            (CommandAction::Terminate, Status::RequestTerminate) => true,
            _ => self.broadcast(action.request_status(), None, None)?,
        };

        if !applied {
            if self.is_terminal() {
                info!(%task_id, ?action, "Command lost the race with completion, discarded");
                return Ok(CommandOutcome::Stale);
            }
            debug!(%task_id, ?action, status = %self.status(), "Command does not apply");
            return Ok(CommandOutcome::Ignored);
        }

        let control = match action {
            CommandAction::Pause => Control::Pause,
            CommandAction::Resume => Control::Run,
            CommandAction::Terminate => {
                self.shared.terminate_requested.store(true, Ordering::SeqCst);
                Control::Terminate
            }
        };
        // Termination is sticky.
        self.shared.control.send_if_modified(|c| {
            if *c == Control::Terminate || *c == control {
                false
            } else {
                *c = control;
                true
            }
        });
        info!(%task_id, ?action, "Command applied");
        Ok(CommandOutcome::Applied)
    }

    /// Waits until the task is terminal, up to `deadline`. Returns the final snapshot.
    pub async fn wait_terminal(&self, deadline: Option<Duration>) -> Option<Task> {
        let mut terminal = self.shared.terminal.subscribe();
        let wait = async move {
            loop {
                if *terminal.borrow_and_update() {
                    return true;
                }
                if terminal.changed().await.is_err() {
                    return false;
                }
            }
        };
        let reached = match deadline {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or(false),
            None => wait.await,
        };
        reached.then(|| self.snapshot())
    }

    pub(crate) fn control(&self) -> watch::Receiver<Control> {
        self.shared.control.subscribe()
    }

    pub(crate) fn terminate_flag(&self) -> Arc<AtomicBool> {
        self.shared.terminate_requested.clone()
    }

    pub(crate) fn set_child(&self, child: Option<ChildTaskRef>) {
        self.lock().child = child;
    }

    /// Releases the status channel. Safe to call more than once.
    pub(crate) fn release(&self) {
        let topic = self.lock().topic.take();
        if let Some(mut topic) = topic {
            if let Err(e) = topic.disconnect() {
                warn!(task_id = %self.id(), error = %e, "Failed to release status channel");
            }
        }
    }
}

/// Ensures a process that stops for any reason (including panics and
/// cancellation) leaves its task terminal and its status channel released.
pub(crate) struct ExitGuard(pub(crate) ProcessHandle);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if !self.0.is_terminal() {
            warn!(task_id = %self.0.id(), "Process ended without a final status");
            self.0.fail("Process ended unexpectedly");
        }
        self.0.release();
    }
}

/// The executor bound to one task.
pub struct Process {
    handle: ProcessHandle,
    strategy: WorkStrategy,
}

impl Process {
    pub fn new(task: Task, status_topic: StatusTopic, strategy: WorkStrategy, options: &ProcessConfig) -> Self {
        let (control, _) = watch::channel(Control::Run);
        let (terminal, _) = watch::channel(task.is_terminal());
        let shared = Shared {
            state: Mutex::new(State {
                task,
                topic: Some(status_topic),
                child: None,
            }),
            control,
            terminal,
            terminate_requested: Arc::new(AtomicBool::new(false)),
            variant: strategy.variant(),
            pausable: matches!(strategy, WorkStrategy::Direct(_)),
            blocking: options.blocking,
            deadline: options.deadline,
        };
        Self {
            handle: ProcessHandle {
                shared: Arc::new(shared),
            },
            strategy,
        }
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// Performs the work, broadcasting each transition.
    ///
    /// A blocking process returns once the task is terminal (or its deadline has
    /// elapsed, which also ends the task FAILED). A non-blocking process returns
    /// as soon as the work is under way; the rest continues in the background
    /// and [`ProcessHandle::wait_terminal`] observes the outcome.
    ///
    /// Returns the task as it stands when `run` returns.
    pub async fn run(self) -> Task {
        let Process { handle, strategy } = self;
        let task_id = handle.id();
        if handle.is_terminal() {
            info!(%task_id, status = %handle.status(), "Task already finished, nothing to run");
            handle.release();
            return handle.snapshot();
        }
        info!(%task_id, variant = handle.variant(), blocking = handle.is_blocking(), "Process started");

        match strategy {
            WorkStrategy::Direct(work) => {
                let guard = ExitGuard(handle.clone());
                if handle.is_blocking() {
                    work::run_direct(work, guard).await;
                } else {
                    tokio::spawn(work::run_direct(work, guard));
                }
            }
            WorkStrategy::Delegated(delegation) => delegation.run(handle.clone()).await,
        }

        let task = handle.snapshot();
        info!(%task_id, status = %task.status, message = %task.message, "Process returned");
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{ChannelFabric, InMemoryBroker};
    use crate::model::{Payload, ScanRequest};
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl Work for Idle {
        async fn execute(&self, _ctx: &mut work::WorkContext) -> Result<String, ProcessError> {
            Ok("done".into())
        }
    }

    fn process() -> (InMemoryBroker, Process) {
        let broker = InMemoryBroker::new();
        let fabric = ChannelFabric::new(Arc::new(broker.clone()));
        let topic = fabric.open_status_topic("mem", "S").unwrap();
        let task = Task::new("t", Payload::Scan(ScanRequest::new("x", vec![1.0])));
        let p = Process::new(task, topic, WorkStrategy::Direct(Arc::new(Idle)), &ProcessConfig::default());
        (broker, p)
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let (_, p) = process();
        let h = p.handle();
        assert!(h.broadcast(Status::Running, Some(10.0), None).unwrap());
        assert!(h.broadcast(Status::Complete, Some(100.0), Some("ok")).unwrap());
        for status in [Status::Running, Status::Failed, Status::Terminated, Status::Complete] {
            assert!(!h.broadcast(status, Some(0.0), Some("late")).unwrap());
        }
        let task = h.snapshot();
        assert_eq!(task.status, Status::Complete);
        assert_eq!(task.message, "ok");
    }

    #[tokio::test]
    async fn percent_never_decreases_and_stays_in_range() {
        let (_, p) = process();
        let h = p.handle();
        h.broadcast(Status::Running, Some(40.0), None).unwrap();
        h.broadcast(Status::Running, Some(20.0), None).unwrap();
        assert_eq!(h.snapshot().percent_complete, 40.0);
        h.broadcast(Status::Running, Some(250.0), None).unwrap();
        assert_eq!(h.snapshot().percent_complete, 100.0);
    }

    #[tokio::test]
    async fn invalid_edges_are_refused() {
        let (_, p) = process();
        let h = p.handle();
        assert!(!h.broadcast(Status::Complete, None, None).unwrap());
        assert_eq!(h.status(), Status::Submitted);
    }

    #[tokio::test]
    async fn commands_after_completion_are_stale() {
        let (_, p) = process();
        let h = p.handle();
        h.broadcast(Status::Running, None, None).unwrap();
        h.broadcast(Status::Complete, Some(100.0), None).unwrap();
        assert_eq!(h.terminate().unwrap(), CommandOutcome::Stale);
        assert_eq!(h.pause().unwrap(), CommandOutcome::Stale);
        assert_eq!(h.status(), Status::Complete);
    }

    #[tokio::test]
    async fn terminate_before_start_ends_terminated_and_run_is_a_no_op() {
        let (broker, p) = process();
        let h = p.handle();
        assert_eq!(h.terminate().unwrap(), CommandOutcome::Applied);
        assert_eq!(h.status(), Status::Terminated);
        let task = p.run().await;
        assert_eq!(task.status, Status::Terminated);
        assert!(h.is_released());
        assert_eq!(broker.open_handles(&crate::fabric::Endpoint::new("mem", "S")), 0);
    }

    #[tokio::test]
    async fn resume_while_running_is_ignored() {
        let (_, p) = process();
        let h = p.handle();
        h.broadcast(Status::Running, None, None).unwrap();
        assert_eq!(h.resume().unwrap(), CommandOutcome::Ignored);
        assert_eq!(h.status(), Status::Running);
    }

    #[tokio::test]
    async fn unpublished_completion_leaves_the_task_failed() {
        let (broker, p) = process();
        let h = p.handle();
        h.broadcast(Status::Running, Some(50.0), Some("half")).unwrap();
        broker.fail_sends_on(&crate::fabric::Endpoint::new("mem", "S"), true);

        assert!(h.broadcast(Status::Running, Some(60.0), Some("more")).is_err());
        assert_eq!(h.status(), Status::Running);
        assert_eq!(h.snapshot().percent_complete, 50.0);

        assert!(h.broadcast(Status::Complete, Some(100.0), Some("ok")).is_err());
        let task = h.wait_terminal(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(task.status, Status::Failed);
        assert!(task.message.starts_with("Could not publish COMPLETE"), "{}", task.message);
        assert_eq!(h.terminate().unwrap(), CommandOutcome::Stale);
    }

    #[tokio::test]
    async fn wait_terminal_honours_its_deadline() {
        let (_, p) = process();
        let h = p.handle();
        assert!(h.wait_terminal(Some(Duration::from_millis(10))).await.is_none());
        h.broadcast(Status::Running, None, None).unwrap();
        h.broadcast(Status::Failed, None, Some("boom")).unwrap();
        assert_eq!(h.wait_terminal(None).await.unwrap().message, "boom");
    }
}
