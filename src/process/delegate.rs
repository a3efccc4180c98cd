//! # Delegated Work
//!
//! A delegated process turns its task into a child task, submits the child to
//! another service, and mirrors the child's lifecycle back onto the parent.
//!
//! ## Sequence
//!
//! ```text
//! RUNNING  1%  derive child (fresh id, copied metadata, resolved channels)
//! RUNNING  2%  build child task
//! RUNNING  3%  open child submit queue, command channel, and bridge subscription
//! RUNNING  4%  submit child   ── failure: terminate child, FAILED, release
//! RUNNING  5%  wait for the bridge's decision, a terminate request, or the deadline
//!          ..  child progress mirrored as 5% + child% * 0.95
//! COMPLETE / TERMINATED / FAILED, then release every child-facing handle
//! ```
//!
//! ## Termination
//!
//! If the child stops on its own the parent just records it. If termination was
//! requested at the parent's level, the parent sends REQUEST_TERMINATE to the
//! child (it cannot infer that intent) and settles once the child confirms.
//! A parent whose wait is cancelled still sends the child REQUEST_TERMINATE
//! before its handles are released.
//!
//! Pause/resume are not supported for delegated work; see
//! [`ProcessHandle::pause`](super::ProcessHandle::pause).

use super::bridge::{Bridge, BridgeSignals, ChildSignal};
use super::machine::{Control, ExitGuard, ProcessHandle};
use super::{DerivationError, ProcessError};
use crate::config::ChannelDefaults;
use crate::fabric::{ChannelFabric, CommandChannel, Subscription};
use crate::model::{ChildTaskRef, Command, Payload, Status, Task};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const COMPLETED_MESSAGE: &str = "Scan completed successfully";
pub const CHILD_STOPPED_MESSAGE: &str = "Scan stopped by delegated service";
pub const TERMINATE_REQUESTED_MESSAGE: &str = "Termination requested before completion";

const WAITING_PERCENT: f64 = 5.0;

/// Builds the child task for `parent` and resolves where it will run.
///
/// Channel names come from the parent's [`ScanAtom`](crate::model::ScanAtom)
/// when set, otherwise from `defaults`.
pub fn derive_child(parent: &Task, defaults: &ChannelDefaults) -> Result<(Task, ChildTaskRef), DerivationError> {
    let atom = match &parent.payload {
        Payload::ScanAtom(atom) => atom,
        Payload::Scan(_) => return Err(DerivationError::NotDelegating(parent.id.to_string())),
    };
    if parent.name.trim().is_empty() {
        return Err(DerivationError::EmptyName);
    }
    if atom.scan.axis.trim().is_empty() {
        return Err(DerivationError::InvalidScanRequest("axis name is required".into()));
    }
    if atom.scan.positions.is_empty() {
        return Err(DerivationError::InvalidScanRequest("no positions to scan".into()));
    }

    let resolve = |over: &Option<String>, default: &str| over.clone().unwrap_or_else(|| default.to_string());
    let broker_address = resolve(&atom.broker_address, &defaults.broker_address);
    if broker_address.trim().is_empty() {
        return Err(DerivationError::InvalidAddress("broker address is empty".into()));
    }

    let mut child = Task::new(parent.name.clone(), Payload::Scan(atom.scan.clone()));
    child.beamline = parent.beamline.clone();
    child.host_name = parent.host_name.clone();
    child.user_name = parent.user_name.clone();

    let child_ref = ChildTaskRef {
        task_id: child.id,
        broker_address,
        submit_queue: resolve(&atom.submit_queue, &defaults.submit_queue),
        status_topic: resolve(&atom.status_topic, &defaults.status_topic),
        command_channel: resolve(&atom.command_channel, &defaults.command_channel),
    };
    Ok((child, child_ref))
}

/// The delegated work strategy.
pub struct Delegation {
    fabric: ChannelFabric,
    defaults: ChannelDefaults,
}

impl Delegation {
    pub fn new(fabric: ChannelFabric, defaults: ChannelDefaults) -> Self {
        Self { fabric, defaults }
    }

    pub(crate) async fn run(self, handle: ProcessHandle) {
        let guard = ExitGuard(handle.clone());
        let task_id = handle.id();
        let control = handle.control();

        if !running(&handle, 1.0, "Deriving child task") {
            return stop_before_submission(&handle);
        }
        let (child, child_ref) = match derive_child(&handle.snapshot(), &self.defaults) {
            Ok(derived) => derived,
            Err(e) => {
                error!(%task_id, error = %e, "Child derivation failed");
                handle.fail(&format!("Could not derive child task: {e}"));
                return;
            }
        };
        info!(%task_id, child_id = %child_ref.task_id, queue = %child_ref.submit_queue, "Derived child task");
        if !running(&handle, 2.0, "Building child task") {
            return stop_before_submission(&handle);
        }

        if !running(&handle, 3.0, "Creating channels to delegated service") {
            return stop_before_submission(&handle);
        }
        let address = &child_ref.broker_address;
        let opened = self
            .fabric
            .open_submit_queue(address, &child_ref.submit_queue)
            .and_then(|queue| {
                let command = self.fabric.open_command_channel(address, &child_ref.command_channel)?;
                let (subscription, signals) = Bridge::attach(&self.fabric, &child_ref, handle.terminate_flag())?;
                Ok((queue, command, subscription, signals))
            });
        let (mut submitter, command, subscription, signals) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                error!(%task_id, error = %e, "Could not open child channels");
                handle.fail(&format!("Could not reach delegated service: {e}"));
                return;
            }
        };
        let waiting = Waiting {
            link: ChildLink {
                child: child_ref,
                command,
                released: false,
            },
            guard,
            subscription,
            signals,
            control,
        };

        if !running(&waiting.guard.0, 4.0, "Submitting child task") {
            stop_before_submission(&waiting.guard.0);
            waiting.release().await;
            return;
        }
        if let Err(e) = submitter.submit(&child) {
            error!(%task_id, child_id = %child.id, error = %e, "Child submission failed");
            // The child may have registered before the failure surfaced.
            waiting.link.command_child("submission failed");
            waiting.guard.0.fail(&format!("Failed to submit child task: {e}"));
            waiting.release().await;
            return;
        }
        if let Err(e) = submitter.disconnect() {
            warn!(%task_id, error = %e, "Failed to release child submit queue");
        }
        info!(%task_id, child_id = %child.id, "Submitted child task");
        handle.set_child(Some(waiting.link.child.clone()));

        // A terminate request that raced the submission is picked up by the wait.
        if !running(&waiting.guard.0, WAITING_PERCENT, "Waiting for child task") && handle.is_terminal() {
            waiting.link.command_child("parent settled during submission");
            waiting.release().await;
            return;
        }

        let deadline = handle.deadline();
        if handle.is_blocking() {
            waiting.wait(deadline).await;
        } else {
            tokio::spawn(waiting.wait(deadline));
        }
    }
}

/// Broadcasts a RUNNING milestone. False means the process can't go on.
fn running(handle: &ProcessHandle, percent: f64, message: &str) -> bool {
    match handle.broadcast(Status::Running, Some(percent), Some(message)) {
        Ok(true) => true,
        Ok(false) => {
            info!(task_id = %handle.id(), status = %handle.status(), "Stopping delegation");
            false
        }
        Err(e) => {
            error!(task_id = %handle.id(), error = %e, "Could not broadcast progress");
            handle.fail(&format!("Could not broadcast progress: {e}"));
            false
        }
    }
}

/// Settles a parent that was asked to terminate before its child existed.
fn stop_before_submission(handle: &ProcessHandle) {
    if handle.status() == Status::RequestTerminate {
        settle(handle, Status::Terminated, None, "Terminated before child submission");
    }
}

/// The child and the channel used to command it.
///
/// Dropped without [`ChildLink::close`] (the waiting future was cancelled or
/// panicked), it sends the child a best-effort REQUEST_TERMINATE so no child
/// outlives the process that tracks it.
struct ChildLink {
    child: ChildTaskRef,
    command: CommandChannel,
    released: bool,
}

impl ChildLink {
    /// Sends REQUEST_TERMINATE to the child. Failures are logged, not returned.
    fn command_child(&self, reason: &str) {
        let command = Command::terminate(self.child.task_id);
        match self.command.send(&command) {
            Ok(()) => info!(child_id = %self.child.task_id, reason, "Sent terminate command to child"),
            Err(e) => error!(child_id = %self.child.task_id, reason, error = %e, "Could not send terminate command to child"),
        }
    }

    fn close(&mut self) {
        self.released = true;
        if let Err(e) = self.command.disconnect() {
            warn!(child_id = %self.child.task_id, error = %e, "Failed to disconnect child command channel");
        }
    }
}

impl Drop for ChildLink {
    fn drop(&mut self) {
        if !self.released {
            warn!(child_id = %self.child.task_id, "Parent interrupted while its child was outstanding");
            self.command_child("parent interrupted");
        }
    }
}

/// Everything a delegated process holds while its child runs.
///
/// Fields drop in order: the child is told to stop before the parent is
/// failed and its channels are released.
struct Waiting {
    link: ChildLink,
    guard: ExitGuard,
    subscription: Subscription,
    signals: BridgeSignals,
    control: watch::Receiver<Control>,
}

impl Waiting {
    async fn wait(mut self, deadline: Option<Duration>) {
        let handle = self.guard.0.clone();
        let task_id = handle.id();
        let expires = deadline.map(|limit| Instant::now() + limit);
        let timer = until(expires);
        tokio::pin!(timer);
        let mut terminate_sent = false;

        let signal = loop {
            tokio::select! {
                // Progress queued before the decision is mirrored first.
                biased;
                Some(progress) = self.signals.progress.recv() => {
                    if handle.status() != Status::Running {
                        continue;
                    }
                    let percent = WAITING_PERCENT + progress.percent.clamp(0.0, 100.0) * (100.0 - WAITING_PERCENT) / 100.0;
                    if let Err(e) = handle.broadcast(Status::Running, Some(percent), Some(&progress.message)) {
                        warn!(%task_id, error = %e, "Could not mirror child progress");
                    }
                }
                decision = &mut self.signals.decision => break decision.ok(),
                changed = self.control.changed(), if !terminate_sent => {
                    if changed.is_err() {
                        break None;
                    }
                    let control = *self.control.borrow_and_update();
                    if control == Control::Terminate {
                        info!(%task_id, child_id = %self.link.child.task_id, "Termination requested, forwarding to child");
                        self.link.command_child("termination requested");
                        terminate_sent = true;
                    }
                }
                _ = &mut timer => {
                    let timeout = ProcessError::Timeout {
                        after: deadline.unwrap_or_default(),
                    };
                    warn!(%task_id, child_id = %self.link.child.task_id, error = %timeout, "Timed out waiting for child");
                    handle.fail(&timeout.to_string());
                    // Best effort; no confirmation is awaited.
                    self.link.command_child("parent timed out");
                    self.release().await;
                    return;
                }
            }
        };

        match signal {
            Some(ChildSignal::Complete) => {
                settle(&handle, Status::Complete, Some(100.0), COMPLETED_MESSAGE);
            }
            Some(ChildSignal::Terminated { self_initiated: true }) => {
                debug!(%task_id, "Child stopped on its own");
                settle(&handle, Status::Terminated, None, CHILD_STOPPED_MESSAGE);
            }
            Some(ChildSignal::Terminated { self_initiated: false }) => {
                if !terminate_sent {
                    self.link.command_child("termination requested");
                }
                settle(&handle, Status::Terminated, None, TERMINATE_REQUESTED_MESSAGE);
            }
            Some(ChildSignal::Failed { message }) => {
                error!(%task_id, child_id = %self.link.child.task_id, %message, "Child task failed");
                settle(&handle, Status::Failed, None, &message);
            }
            None => {
                handle.fail("Lost track of child task");
            }
        }
        self.release().await;
    }

    /// Unsubscribes the bridge and disconnects the command channel. A failure
    /// releasing one handle does not stop the release of the other.
    async fn release(self) {
        let Waiting {
            mut link,
            guard,
            subscription,
            ..
        } = self;
        debug!(child_id = %link.child.task_id, "Releasing child channels");
        if let Err(e) = subscription.unsubscribe().await {
            warn!(child_id = %link.child.task_id, error = %e, "Failed to unsubscribe from child status");
        }
        link.close();
        guard.0.set_child(None);
        drop(guard);
    }
}

fn settle(handle: &ProcessHandle, status: Status, percent: Option<f64>, message: &str) {
    match handle.broadcast(status, percent, Some(message)) {
        Ok(true) => info!(task_id = %handle.id(), %status, message, "Parent settled"),
        Ok(false) => info!(task_id = %handle.id(), current = %handle.status(), "Parent already settled"),
        Err(e) => error!(task_id = %handle.id(), error = %e, "Could not publish final status"),
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ScanAtom, ScanRequest};

    fn atom_task(atom: ScanAtom) -> Task {
        Task::new("grid", Payload::ScanAtom(atom))
            .with_user("operator")
            .with_host("ws01")
            .with_beamline("i15")
    }

    #[test]
    fn child_copies_metadata_and_gets_a_fresh_id() {
        let parent = atom_task(ScanAtom::new(ScanRequest::new("x", vec![0.0, 1.0])));
        let (child, child_ref) = derive_child(&parent, &ChannelDefaults::default()).unwrap();
        assert_ne!(child.id, parent.id);
        assert_eq!(child_ref.task_id, child.id);
        assert_eq!(child.status, Status::Submitted);
        assert_eq!(child.name, "grid");
        assert_eq!(child.user_name.as_deref(), Some("operator"));
        assert_eq!(child.host_name.as_deref(), Some("ws01"));
        assert_eq!(child.beamline.as_deref(), Some("i15"));
        assert!(matches!(child.payload, Payload::Scan(_)));
    }

    #[test]
    fn channel_overrides_beat_defaults() {
        let atom = ScanAtom::new(ScanRequest::new("x", vec![0.0]))
            .on_service("tcp://scan:61616", "scan.submit", "scan.status");
        let (_, child_ref) = derive_child(&atom_task(atom), &ChannelDefaults::default()).unwrap();
        assert_eq!(child_ref.broker_address, "tcp://scan:61616");
        assert_eq!(child_ref.submit_queue, "scan.submit");
        assert_eq!(child_ref.status_topic, "scan.status");
        assert_eq!(child_ref.command_channel, crate::config::COMMAND_TOPIC);
    }

    #[test]
    fn invalid_parents_are_rejected_before_submission() {
        let direct = Task::new("d", Payload::Scan(ScanRequest::new("x", vec![0.0])));
        assert!(matches!(
            derive_child(&direct, &ChannelDefaults::default()),
            Err(DerivationError::NotDelegating(_))
        ));

        let empty = atom_task(ScanAtom::new(ScanRequest::new("x", vec![])));
        assert!(matches!(
            derive_child(&empty, &ChannelDefaults::default()),
            Err(DerivationError::InvalidScanRequest(_))
        ));

        let mut nameless = atom_task(ScanAtom::new(ScanRequest::new("x", vec![1.0])));
        nameless.name = " ".into();
        assert_eq!(
            derive_child(&nameless, &ChannelDefaults::default()).unwrap_err(),
            DerivationError::EmptyName
        );

        let mut atom = ScanAtom::new(ScanRequest::new("x", vec![1.0]));
        atom.broker_address = Some(String::new());
        assert!(matches!(
            derive_child(&atom_task(atom), &ChannelDefaults::default()),
            Err(DerivationError::InvalidAddress(_))
        ));
    }
}
