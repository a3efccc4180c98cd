use crate::config::{ChannelDefaults, ProcessConfig};
use crate::fabric::{ChannelFabric, StatusTopic};
use crate::model::{Payload, Task};
use crate::process::{Delegation, Process, ProcessError, WorkStrategy};
use crate::scan::ScanWork;
use std::sync::Arc;

/// Builds the [`Process`] that will execute a dequeued task.
pub trait ProcessFactory: Send + Sync + 'static {
    fn create(&self, task: Task, status_topic: StatusTopic) -> Result<Process, ProcessError>;
}

/// Runs plain scans in place and delegates scan atoms to another service.
#[derive(Clone)]
pub struct DefaultProcessFactory {
    fabric: ChannelFabric,
    delegate_to: ChannelDefaults,
    options: ProcessConfig,
}

impl DefaultProcessFactory {
    /// `delegate_to` names the service that receives child tasks when a
    /// [`ScanAtom`](crate::model::ScanAtom) does not override it.
    pub fn new(fabric: ChannelFabric, delegate_to: ChannelDefaults, options: ProcessConfig) -> Self {
        Self {
            fabric,
            delegate_to,
            options,
        }
    }
}

impl ProcessFactory for DefaultProcessFactory {
    fn create(&self, task: Task, status_topic: StatusTopic) -> Result<Process, ProcessError> {
        let strategy = match &task.payload {
            Payload::Scan(_) => WorkStrategy::Direct(Arc::new(ScanWork)),
            Payload::ScanAtom(_) => {
                WorkStrategy::Delegated(Delegation::new(self.fabric.clone(), self.delegate_to.clone()))
            }
        };
        Ok(Process::new(task, status_topic, strategy, &self.options))
    }
}
