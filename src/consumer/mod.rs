//! # Consumer
//!
//! A worker loop that takes tasks off a submit queue and executes each through
//! a [`Process`](crate::process::Process) built by a [`ProcessFactory`].
//!
//! ## Responsibilities
//!
//! - Refuse to start if the broker cannot be reached ([`ConsumerError::Startup`])
//! - Skip redelivered tasks: already terminal, active here, or recently finished here
//! - Route commands from the command channel to the owning process by task id
//! - Publish heartbeats while running
//! - Make sure every task it accepted ends with a final status, even if its process panics
//!
//! Tasks are executed one at a time, in queue order.

pub mod factory;

pub use factory::{DefaultProcessFactory, ProcessFactory};

use crate::config::{ChannelDefaults, Config, HeartbeatConfig};
use crate::fabric::{
    ChannelError, ChannelFabric, CommandChannel, CommandListener, Subscription, WorkQueue,
};
use crate::heartbeat::{HeartbeatPublisher, Load};
use crate::model::{Command, Status, Task};
use crate::process::{CommandOutcome, ProcessHandle};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

/// How many finished task ids a consumer remembers for duplicate detection.
const REMEMBERED_TASKS: usize = 1024;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Consumer could not start: {0}")]
    Startup(#[from] ChannelError),

    #[error("Consumer {0} is already running")]
    AlreadyRunning(String),
}

#[derive(Default)]
struct Tasks {
    active: HashMap<Uuid, ProcessHandle>,
    finished: VecDeque<Uuid>,
}

/// Processes known to one consumer, keyed by task id.
#[derive(Clone, Default)]
pub struct Registry {
    tasks: Arc<Mutex<Tasks>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `handle` unless its task is active or was recently finished here.
    fn admit(&self, id: Uuid, handle: ProcessHandle) -> bool {
        let mut tasks = self.lock();
        if tasks.active.contains_key(&id) || tasks.finished.contains(&id) {
            return false;
        }
        tasks.active.insert(id, handle);
        true
    }

    fn finish(&self, id: Uuid) {
        let mut tasks = self.lock();
        tasks.active.remove(&id);
        if tasks.finished.len() == REMEMBERED_TASKS {
            tasks.finished.pop_front();
        }
        tasks.finished.push_back(id);
    }

    fn was_finished(&self, id: Uuid) -> bool {
        self.lock().finished.contains(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<ProcessHandle> {
        self.lock().active.get(&id).cloned()
    }

    pub fn active(&self) -> Vec<ProcessHandle> {
        self.lock().active.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies commands to the processes of one consumer.
struct CommandRouter {
    worker_id: String,
    registry: Registry,
}

#[async_trait]
impl CommandListener for CommandRouter {
    async fn on_command(&self, command: &Command) {
        let task_id = command.task_id;
        let Some(handle) = self.registry.get(task_id) else {
            if self.registry.was_finished(task_id) {
                info!(worker_id = %self.worker_id, %task_id, action = ?command.action, "Discarding command for finished task");
            } else {
                debug!(worker_id = %self.worker_id, %task_id, "Command is not for this worker");
            }
            return;
        };
        match handle.apply(command) {
            Ok(CommandOutcome::Applied) => {
                info!(worker_id = %self.worker_id, %task_id, action = ?command.action, "Command applied")
            }
            Ok(CommandOutcome::Stale) => {
                info!(worker_id = %self.worker_id, %task_id, action = ?command.action, "Stale command discarded")
            }
            Ok(CommandOutcome::Ignored) => {
                debug!(worker_id = %self.worker_id, %task_id, action = ?command.action, "Command ignored")
            }
            Err(e) => error!(worker_id = %self.worker_id, %task_id, error = %e, "Command refused"),
        }
    }
}

pub struct Consumer {
    worker_id: String,
    fabric: ChannelFabric,
    channels: ChannelDefaults,
    heartbeat: HeartbeatConfig,
    factory: Arc<dyn ProcessFactory>,
    running: Arc<AtomicBool>,
}

impl Consumer {
    pub fn new(
        worker_id: impl Into<String>,
        fabric: ChannelFabric,
        config: &Config,
        factory: Arc<dyn ProcessFactory>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            fabric,
            channels: config.channels.clone(),
            heartbeat: config.heartbeat.clone(),
            factory,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Connects, subscribes to commands, starts the heartbeat and the work loop.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub fn start(&self) -> Result<ConsumerHandle, ConsumerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConsumerError::AlreadyRunning(self.worker_id.clone()));
        }
        let started = self.open();
        if started.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        started
    }

    fn open(&self) -> Result<ConsumerHandle, ConsumerError> {
        let address = &self.channels.broker_address;
        if let Err(e) = self.fabric.connect(address) {
            error!(worker_id = %self.worker_id, %address, error = %e, "Broker unreachable, consumer not started");
            return Err(e.into());
        }

        let queue = self.fabric.open_work_queue(address, &self.channels.submit_queue)?;
        let registry = Registry::default();
        let command_channel = self.fabric.open_command_channel(address, &self.channels.command_channel)?;
        let commands = command_channel.subscribe(Arc::new(CommandRouter {
            worker_id: self.worker_id.clone(),
            registry: registry.clone(),
        }))?;

        let heartbeat_topic = self.fabric.open_heartbeat_topic(address, &self.channels.heartbeat_topic)?;
        let probe = {
            let registry = registry.clone();
            let broker = self.fabric.broker().clone();
            let endpoint = queue.endpoint().clone();
            move || Load {
                queue_depth: Some(broker.queue_depth(&endpoint)),
                active_tasks: Some(registry.len()),
            }
        };
        let heartbeat = HeartbeatPublisher::start(heartbeat_topic, self.worker_id.clone(), self.heartbeat.interval, probe);

        let (shutdown, stopping) = watch::channel(false);
        let worker = Worker {
            worker_id: self.worker_id.clone(),
            fabric: self.fabric.clone(),
            channels: self.channels.clone(),
            factory: self.factory.clone(),
            registry: registry.clone(),
        };
        let running = self.running.clone();
        let span = info_span!("consumer", worker_id = %self.worker_id);
        let task = tokio::spawn(
            async move {
                worker.work_loop(queue, stopping).await;
                running.store(false, Ordering::SeqCst);
            }
            .instrument(span),
        );

        info!(worker_id = %self.worker_id, queue = %self.channels.submit_queue, "Consumer started");
        Ok(ConsumerHandle {
            worker_id: self.worker_id.clone(),
            registry,
            shutdown,
            worker: task,
            commands,
            command_channel,
            heartbeat,
        })
    }
}

/// A started consumer.
///
/// Dropping it stops the loop after the current task; [`stop`](Self::stop)
/// also terminates running work and releases every channel before returning.
pub struct ConsumerHandle {
    worker_id: String,
    registry: Registry,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    commands: Subscription,
    command_channel: CommandChannel,
    heartbeat: HeartbeatPublisher,
}

impl ConsumerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn process(&self, task_id: Uuid) -> Option<ProcessHandle> {
        self.registry.get(task_id)
    }

    pub fn active(&self) -> Vec<ProcessHandle> {
        self.registry.active()
    }

    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn stop(self) {
        let ConsumerHandle {
            worker_id,
            registry,
            shutdown,
            worker,
            commands,
            mut command_channel,
            heartbeat,
        } = self;
        info!(%worker_id, active = registry.len(), "Stopping consumer");
        shutdown.send_replace(true);
        for handle in registry.active() {
            if let Err(e) = handle.terminate() {
                warn!(%worker_id, task_id = %handle.id(), error = %e, "Could not terminate task on shutdown");
            }
        }
        if let Err(e) = worker.await {
            error!(%worker_id, error = %e, "Consumer loop ended abnormally");
        }
        if let Err(e) = commands.unsubscribe().await {
            warn!(%worker_id, error = %e, "Failed to unsubscribe from commands");
        }
        if let Err(e) = command_channel.disconnect() {
            warn!(%worker_id, error = %e, "Failed to release command channel");
        }
        heartbeat.stop().await;
        info!(%worker_id, "Consumer stopped");
    }
}

/// State moved into the work loop task.
struct Worker {
    worker_id: String,
    fabric: ChannelFabric,
    channels: ChannelDefaults,
    factory: Arc<dyn ProcessFactory>,
    registry: Registry,
}

impl Worker {
    async fn work_loop(self, mut queue: WorkQueue, mut stopping: watch::Receiver<bool>) {
        loop {
            if *stopping.borrow_and_update() {
                break;
            }
            let received = tokio::select! {
                biased;
                _ = stopping.changed() => break,
                received = queue.receive() => received,
            };
            match received {
                Ok(task) => self.execute(task, &stopping).await,
                Err(ChannelError::Codec(e)) => warn!(worker_id = %self.worker_id, error = %e, "Skipping undecodable task"),
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Work queue failed, consumer stopping");
                    break;
                }
            }
        }
        if let Err(e) = queue.disconnect() {
            warn!(worker_id = %self.worker_id, error = %e, "Failed to release work queue");
        }
        debug!(worker_id = %self.worker_id, "Work loop ended");
    }

    async fn execute(&self, task: Task, stopping: &watch::Receiver<bool>) {
        let task_id = task.id;
        if task.is_terminal() {
            info!(worker_id = %self.worker_id, %task_id, status = %task.status, "Skipping finished task");
            return;
        }
        if self.registry.get(task_id).is_some() || self.registry.was_finished(task_id) {
            info!(worker_id = %self.worker_id, %task_id, "Skipping duplicate delivery");
            return;
        }

        let address = &self.channels.broker_address;
        let topic = match self.fabric.open_status_topic(address, &self.channels.status_topic) {
            Ok(topic) => topic,
            Err(e) => {
                error!(worker_id = %self.worker_id, %task_id, error = %e, "Cannot open status topic, task left unprocessed");
                return;
            }
        };
        let process = match self.factory.create(task.clone(), topic) {
            Ok(process) => process,
            Err(e) => {
                error!(worker_id = %self.worker_id, %task_id, error = %e, "No process for task");
                self.report_failure(task, &format!("No process for task: {e}"));
                return;
            }
        };

        let handle = process.handle();
        if !self.registry.admit(task_id, handle.clone()) {
            info!(worker_id = %self.worker_id, %task_id, "Skipping duplicate delivery");
            handle.release();
            return;
        }
        // Admitted after the shutdown sweep: terminate here instead.
        if *stopping.borrow() {
            info!(worker_id = %self.worker_id, %task_id, "Consumer stopping, task terminated before it ran");
            if let Err(e) = handle.terminate() {
                warn!(worker_id = %self.worker_id, %task_id, error = %e, "Could not terminate task on shutdown");
            }
        } else if let Err(e) = handle.broadcast(Status::Queued, None, Some("Queued")) {
            warn!(worker_id = %self.worker_id, %task_id, error = %e, "Could not broadcast queued status");
        }

        let run = tokio::spawn(process.run().instrument(info_span!("process", %task_id)));
        if let Err(e) = run.await {
            error!(worker_id = %self.worker_id, %task_id, error = %e, "Process crashed");
            handle.fail("Process crashed");
            handle.release();
        }

        if handle.is_terminal() {
            self.registry.finish(task_id);
        } else {
            // Non-blocking processes settle in the background.
            let registry = self.registry.clone();
            tokio::spawn(async move {
                handle.wait_terminal(None).await;
                registry.finish(task_id);
            });
        }
    }

    /// Publishes a FAILED snapshot for a task that never got a process.
    fn report_failure(&self, mut task: Task, message: &str) {
        task.status = Status::Failed;
        task.message = message.to_string();
        let published = self
            .fabric
            .open_status_topic(&self.channels.broker_address, &self.channels.status_topic)
            .and_then(|mut topic| {
                topic.publish(&task)?;
                topic.disconnect()
            });
        if let Err(e) = published {
            error!(worker_id = %self.worker_id, task_id = %task.id, error = %e, "Could not report task failure");
        }
        self.registry.finish(task.id);
    }
}
