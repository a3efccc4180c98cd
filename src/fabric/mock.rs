//! # Scripted Services
//!
//! [`ScriptedService`] stands in for a remote service in tests: it dequeues
//! tasks from a submit queue and replays a fixed status script for each one,
//! while recording every command it is sent.
//!
//! ```rust,ignore
//! let child = ScriptedService::start(&fabric, &channels, vec![
//!     ScriptStep::running(10.0),
//!     ScriptStep::running(100.0),
//!     ScriptStep::emit(Status::Complete, 100.0, "done"),
//! ])?;
//! ```
//!
//! Use [`ScriptStep::WaitFor`] to hold the script until a command arrives, and
//! [`ScriptStep::Hang`] to model a service that goes silent.

use super::{ChannelError, ChannelFabric, CommandListener, Subscription};
use crate::config::ChannelDefaults;
use crate::model::{Command, CommandAction, Status, Task};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Publish the task with this status, percentage and message.
    Emit {
        status: Status,
        percent: f64,
        message: String,
    },
    /// Wait until a command with this action arrives for the current task.
    WaitFor(CommandAction),
    /// Stop responding for the current task.
    Hang,
}

impl ScriptStep {
    pub fn emit(status: Status, percent: f64, message: impl Into<String>) -> Self {
        ScriptStep::Emit {
            status,
            percent,
            message: message.into(),
        }
    }

    pub fn running(percent: f64) -> Self {
        Self::emit(Status::Running, percent, "Running")
    }
}

struct Recorder {
    commands: Arc<Mutex<Vec<Command>>>,
    forward: mpsc::UnboundedSender<Command>,
}

#[async_trait]
impl CommandListener for Recorder {
    async fn on_command(&self, command: &Command) {
        debug!(task_id = %command.task_id, action = ?command.action, "Scripted service got command");
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command.clone());
        let _ = self.forward.send(command.clone());
    }
}

/// A fake service replaying a status script for every task it receives.
pub struct ScriptedService {
    received: Arc<Mutex<Vec<Task>>>,
    commands: Arc<Mutex<Vec<Command>>>,
    worker: JoinHandle<()>,
    _command_subscription: Subscription,
}

impl ScriptedService {
    pub fn start(
        fabric: &ChannelFabric,
        channels: &ChannelDefaults,
        script: Vec<ScriptStep>,
    ) -> Result<Self, ChannelError> {
        let address = &channels.broker_address;
        let queue = fabric.open_work_queue(address, &channels.submit_queue)?;
        let status = fabric.open_status_topic(address, &channels.status_topic)?;
        let command_channel = fabric.open_command_channel(address, &channels.command_channel)?;

        let received = Arc::new(Mutex::new(Vec::new()));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let (forward, mut inbox) = mpsc::unbounded_channel();
        let subscription = command_channel.subscribe(Arc::new(Recorder {
            commands: commands.clone(),
            forward,
        }))?;

        let log = received.clone();
        let worker = tokio::spawn(async move {
            // Keep the command publisher alive as long as the subscription.
            let _command_channel = command_channel;
            while let Ok(mut task) = queue.receive().await {
                log.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(task.clone());
                for step in &script {
                    match step {
                        ScriptStep::Emit {
                            status: next,
                            percent,
                            message,
                        } => {
                            task.status = *next;
                            task.percent_complete = *percent;
                            task.message = message.clone();
                            if status.publish(&task).is_err() {
                                return;
                            }
                        }
                        ScriptStep::WaitFor(action) => loop {
                            match inbox.recv().await {
                                Some(c) if c.task_id == task.id && c.action == *action => break,
                                Some(_) => continue,
                                None => return,
                            }
                        },
                        ScriptStep::Hang => break,
                    }
                }
            }
        });

        Ok(Self {
            received,
            commands,
            worker,
            _command_subscription: subscription,
        })
    }

    /// Tasks received so far, in arrival order.
    pub fn received(&self) -> Vec<Task> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<Command> {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn commands_for(&self, task_id: uuid::Uuid) -> Vec<CommandAction> {
        self.commands()
            .into_iter()
            .filter(|c| c.task_id == task_id)
            .map(|c| c.action)
            .collect()
    }

    pub fn shutdown(self) {
        self.worker.abort();
    }
}

impl Drop for ScriptedService {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
