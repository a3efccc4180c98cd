use super::Status;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A control message targeted at a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub task_id: Uuid,
    pub action: CommandAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Pause,
    Resume,
    Terminate,
}

impl CommandAction {
    /// The transient status a process shows while acting on this command.
    pub fn request_status(self) -> Status {
        match self {
            CommandAction::Pause => Status::RequestPause,
            CommandAction::Resume => Status::RequestResume,
            CommandAction::Terminate => Status::RequestTerminate,
        }
    }

    /// Maps a request status back to its action. Non-request statuses are not commands.
    pub fn from_request(status: Status) -> Option<Self> {
        match status {
            Status::RequestPause => Some(CommandAction::Pause),
            Status::RequestResume => Some(CommandAction::Resume),
            Status::RequestTerminate => Some(CommandAction::Terminate),
            _ => None,
        }
    }
}

impl Command {
    pub fn new(task_id: Uuid, action: CommandAction) -> Self {
        Self { task_id, action }
    }

    pub fn terminate(task_id: Uuid) -> Self {
        Self::new(task_id, CommandAction::Terminate)
    }

    pub fn pause(task_id: Uuid) -> Self {
        Self::new(task_id, CommandAction::Pause)
    }

    pub fn resume(task_id: Uuid) -> Self {
        Self::new(task_id, CommandAction::Resume)
    }
}
