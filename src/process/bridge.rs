//! # Bridge
//!
//! Listens to a child task's status topic and turns the child's status stream
//! into signals for the parent process. The bridge never touches the parent
//! task; it only holds the child id, a one-shot sender for the decisive signal,
//! a progress sender, and a read-only view of the parent's termination flag.
//!
//! ```text
//!  child STATUS_TOPIC ──► Bridge::on_event ──┬─► oneshot<ChildSignal>   (first terminal status wins)
//!                                            └─► mpsc<ChildProgress>    (while the child runs)
//! ```

use crate::fabric::{ChannelError, ChannelFabric, StatusListener, Subscription};
use crate::model::{ChildTaskRef, Status, Task};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

/// The decisive outcome of a child task, as seen by its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildSignal {
    Complete,
    /// `self_initiated` is true when the child stopped without the parent asking.
    Terminated { self_initiated: bool },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildProgress {
    pub percent: f64,
    pub message: String,
}

/// Receiving ends handed to the waiting parent.
pub struct BridgeSignals {
    pub decision: oneshot::Receiver<ChildSignal>,
    pub progress: mpsc::UnboundedReceiver<ChildProgress>,
}

pub struct Bridge {
    child_id: Uuid,
    decision: Mutex<Option<oneshot::Sender<ChildSignal>>>,
    progress: mpsc::UnboundedSender<ChildProgress>,
    parent_requested: Arc<AtomicBool>,
}

impl Bridge {
    pub fn new(child_id: Uuid, parent_requested: Arc<AtomicBool>) -> (Self, BridgeSignals) {
        let (decision_tx, decision) = oneshot::channel();
        let (progress_tx, progress) = mpsc::unbounded_channel();
        let bridge = Self {
            child_id,
            decision: Mutex::new(Some(decision_tx)),
            progress: progress_tx,
            parent_requested,
        };
        (bridge, BridgeSignals { decision, progress })
    }

    /// Subscribes a new bridge to the child's status topic.
    pub fn attach(
        fabric: &ChannelFabric,
        child: &ChildTaskRef,
        parent_requested: Arc<AtomicBool>,
    ) -> Result<(Subscription, BridgeSignals), ChannelError> {
        let (bridge, signals) = Self::new(child.task_id, parent_requested);
        let topic = fabric.open_status_topic(&child.broker_address, &child.status_topic)?;
        let subscription = topic.subscribe(Arc::new(bridge))?;
        Ok((subscription, signals))
    }

    /// Maps a child snapshot to a decisive signal, if its status is decisive.
    pub fn translate(task: &Task, parent_requested: bool) -> Option<ChildSignal> {
        match task.status {
            Status::Complete => Some(ChildSignal::Complete),
            Status::Terminated => Some(ChildSignal::Terminated {
                self_initiated: !parent_requested,
            }),
            Status::Failed => Some(ChildSignal::Failed {
                message: task.message.clone(),
            }),
            _ => None,
        }
    }

    fn decided(&self) -> bool {
        self.decision
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

#[async_trait]
impl StatusListener for Bridge {
    async fn on_event(&self, task: &Task) {
        if task.id != self.child_id {
            return;
        }
        let parent_requested = self.parent_requested.load(Ordering::SeqCst);
        match Self::translate(task, parent_requested) {
            Some(signal) => {
                let sender = self
                    .decision
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                match sender {
                    Some(sender) => {
                        info!(child_id = %self.child_id, ?signal, "Child task finished");
                        let _ = sender.send(signal);
                    }
                    None => debug!(child_id = %self.child_id, status = %task.status, "Ignoring child status after decision"),
                }
            }
            None if task.status == Status::Running && !self.decided() => {
                let _ = self.progress.send(ChildProgress {
                    percent: task.percent_complete,
                    message: task.message.clone(),
                });
            }
            None => debug!(child_id = %self.child_id, status = %task.status, "Child status"),
        }
    }
}
