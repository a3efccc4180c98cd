use crate::config::ChannelDefaults;
use crate::fabric::{ChannelError, ChannelFabric, StatusListener};
use crate::model::{Command, CommandAction, Task};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Task {task_id} did not finish within {after:?}")]
    Timeout { task_id: Uuid, after: Duration },

    #[error("Status stream for task {task_id} ended before it finished")]
    StreamClosed { task_id: Uuid },
}

/// Forwards the snapshots of one task.
struct Watcher {
    task_id: Uuid,
    snapshots: mpsc::UnboundedSender<Task>,
}

#[async_trait]
impl StatusListener for Watcher {
    async fn on_event(&self, task: &Task) {
        if task.id == self.task_id {
            let _ = self.snapshots.send(task.clone());
        }
    }
}

/// Submits tasks to a service and controls them afterwards.
#[derive(Clone)]
pub struct SubmissionClient {
    fabric: ChannelFabric,
    channels: ChannelDefaults,
}

impl SubmissionClient {
    pub fn new(fabric: ChannelFabric, channels: ChannelDefaults) -> Self {
        Self { fabric, channels }
    }

    pub fn channels(&self) -> &ChannelDefaults {
        &self.channels
    }

    /// Queues `task` and returns without waiting for it to run.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub fn submit(&self, task: &Task) -> Result<(), ChannelError> {
        debug!(?task, "submit called");
        let mut queue = self
            .fabric
            .open_submit_queue(&self.channels.broker_address, &self.channels.submit_queue)?;
        queue.submit(task)?;
        info!(queue = %queue.endpoint(), "Task submitted");
        queue.disconnect()
    }

    /// Queues `task` and waits until it is observed terminal, up to `deadline`.
    ///
    /// The status subscription is in place before the task is queued, so no
    /// update can be missed.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn submit_and_wait(&self, task: &Task, deadline: Option<Duration>) -> Result<Task, ClientError> {
        let task_id = task.id;
        let (snapshots, mut updates) = mpsc::unbounded_channel();
        let mut topic = self
            .fabric
            .open_status_topic(&self.channels.broker_address, &self.channels.status_topic)?;
        let subscription = topic.subscribe(Arc::new(Watcher { task_id, snapshots }))?;

        let outcome = match self.submit(task) {
            Ok(()) => {
                let settled = async {
                    while let Some(snapshot) = updates.recv().await {
                        debug!(status = %snapshot.status, percent = snapshot.percent_complete, "Update");
                        if snapshot.is_terminal() {
                            return Some(snapshot);
                        }
                    }
                    None
                };
                match deadline {
                    Some(after) => tokio::time::timeout(after, settled)
                        .await
                        .map_err(|_| ClientError::Timeout { task_id, after })
                        .and_then(|done| done.ok_or(ClientError::StreamClosed { task_id })),
                    None => settled.await.ok_or(ClientError::StreamClosed { task_id }),
                }
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = subscription.unsubscribe().await {
            warn!(error = %e, "Failed to unsubscribe from status topic");
        }
        if let Err(e) = topic.disconnect() {
            warn!(error = %e, "Failed to release status topic");
        }
        if let Ok(done) = &outcome {
            info!(status = %done.status, message = %done.message, "Task finished");
        }
        outcome
    }

    pub fn pause(&self, task_id: Uuid) -> Result<(), ChannelError> {
        self.command(Command::new(task_id, CommandAction::Pause))
    }

    pub fn resume(&self, task_id: Uuid) -> Result<(), ChannelError> {
        self.command(Command::new(task_id, CommandAction::Resume))
    }

    pub fn terminate(&self, task_id: Uuid) -> Result<(), ChannelError> {
        self.command(Command::new(task_id, CommandAction::Terminate))
    }

    #[instrument(skip(self), fields(task_id = %command.task_id))]
    fn command(&self, command: Command) -> Result<(), ChannelError> {
        let mut channel = self
            .fabric
            .open_command_channel(&self.channels.broker_address, &self.channels.command_channel)?;
        channel.send(&command)?;
        info!(action = ?command.action, "Command sent");
        channel.disconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{Broker, Endpoint, InMemoryBroker};
    use crate::model::{Payload, ScanRequest, Status};

    fn client() -> (InMemoryBroker, SubmissionClient) {
        let broker = InMemoryBroker::new();
        let fabric = ChannelFabric::new(Arc::new(broker.clone()));
        (broker, SubmissionClient::new(fabric, ChannelDefaults::default()))
    }

    fn task() -> Task {
        Task::new("t", Payload::Scan(ScanRequest::new("x", vec![0.0])))
    }

    #[tokio::test]
    async fn submit_queues_and_releases_the_queue() {
        let (broker, client) = client();
        let t = task();
        client.submit(&t).unwrap();
        let queue = Endpoint::new(&client.channels().broker_address, &client.channels().submit_queue);
        assert_eq!(broker.queue_depth(&queue), 1);
        assert_eq!(broker.open_handles(&queue), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_without_a_worker_times_out_and_leaves_nothing_open() {
        let (broker, client) = client();
        let t = task();
        let err = client.submit_and_wait(&t, Some(Duration::from_secs(2))).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { task_id, .. } if task_id == t.id));
        let status = Endpoint::new(&client.channels().broker_address, &client.channels().status_topic);
        assert_eq!(broker.open_handles(&status), 0);
    }

    #[tokio::test]
    async fn waiting_returns_the_terminal_snapshot() {
        let (_, client) = client();
        let t = task();
        let publisher = client
            .fabric
            .open_status_topic(&client.channels().broker_address, &client.channels().status_topic)
            .unwrap();
        let worker = {
            let mut done = t.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.status = Status::Running;
                publisher.publish(&done).unwrap();
                done.status = Status::Complete;
                done.message = "ok".into();
                publisher.publish(&done).unwrap();
            })
        };
        let done = client.submit_and_wait(&t, Some(Duration::from_secs(5))).await.unwrap();
        worker.await.unwrap();
        assert_eq!(done.status, Status::Complete);
        assert_eq!(done.message, "ok");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_channel_error() {
        let (broker, client) = client();
        broker.set_reachable(&client.channels().broker_address, false);
        assert!(matches!(
            client.submit(&task()),
            Err(ChannelError::Connection { .. })
        ));
        assert!(matches!(
            client.terminate(Uuid::new_v4()),
            Err(ChannelError::Connection { .. })
        ));
    }
}
