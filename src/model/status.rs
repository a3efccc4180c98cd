//! Task status values and the transition graph between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a [`Task`](crate::model::Task).
///
/// `Complete`, `Failed` and `Terminated` are terminal: once a task reaches one of
/// them no further transition is accepted. The `Request*` variants are transient
/// states a command consumer sets before the task settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Submitted,
    Queued,
    Running,
    RequestPause,
    Paused,
    RequestResume,
    RequestTerminate,
    Complete,
    Failed,
    Terminated,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Failed | Status::Terminated)
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            Status::RequestPause | Status::RequestResume | Status::RequestTerminate
        )
    }

    /// True while the task is doing (or about to resume) work.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Status::Running | Status::RequestPause | Status::RequestResume
        )
    }

    /// Whether `self -> next` is an edge of the status graph.
    ///
    /// `Running -> Running` is allowed so progress updates can be broadcast.
    /// Terminal states have no outgoing edges at all.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        match self {
            Submitted => matches!(next, Queued | Running | Failed | Terminated),
            Queued => matches!(next, Running | Failed | Terminated),
            Running => matches!(
                next,
                Running | Paused | RequestPause | RequestTerminate | Complete | Failed | Terminated
            ),
            RequestPause => matches!(
                next,
                Paused | Running | RequestTerminate | Complete | Failed | Terminated
            ),
            Paused => matches!(
                next,
                Running | RequestResume | RequestTerminate | Failed | Terminated
            ),
            RequestResume => matches!(
                next,
                Running | Paused | RequestTerminate | Failed | Terminated
            ),
            RequestTerminate => matches!(next, Terminated | Complete | Failed),
            Complete | Failed | Terminated => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Submitted => "SUBMITTED",
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::RequestPause => "REQUEST_PAUSE",
            Status::Paused => "PAUSED",
            Status::RequestResume => "REQUEST_RESUME",
            Status::RequestTerminate => "REQUEST_TERMINATE",
            Status::Complete => "COMPLETE",
            Status::Failed => "FAILED",
            Status::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 10] = [
        Status::Submitted,
        Status::Queued,
        Status::Running,
        Status::RequestPause,
        Status::Paused,
        Status::RequestResume,
        Status::RequestTerminate,
        Status::Complete,
        Status::Failed,
        Status::Terminated,
    ];

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn paused_task_cannot_complete_without_resuming() {
        assert!(!Status::Paused.can_transition_to(Status::Complete));
        assert!(Status::Paused.can_transition_to(Status::Running));
    }

    #[test]
    fn terminate_request_can_still_lose_to_completion() {
        assert!(Status::RequestTerminate.can_transition_to(Status::Complete));
        assert!(!Status::RequestTerminate.can_transition_to(Status::Running));
    }

    #[test]
    fn serializes_in_wire_case() {
        let json = serde_json::to_string(&Status::RequestTerminate).unwrap();
        assert_eq!(json, "\"REQUEST_TERMINATE\"");
    }
}
