//! Task execution: the status state machine and its two work strategies.
//!
//! # Main Components
//!
//! - [`Process`] - Executes one task to a terminal status
//! - [`ProcessHandle`] - Commands, snapshots and the completion wait for a running process
//! - [`WorkStrategy`] - [`Work`] done in place, or a [`Delegation`] to another service
//! - [`Bridge`] - Turns a child task's status stream into signals for its parent
//!
//! # Variants
//!
//! | Strategy    | Pause/Resume   | Terminate                              |
//! |-------------|----------------|----------------------------------------|
//! | `Direct`    | at checkpoints | at the next checkpoint                 |
//! | `Delegated` | unsupported    | forwarded to the child, then confirmed |

pub mod bridge;
pub mod delegate;
pub mod error;
mod machine;
pub mod work;

pub use bridge::{Bridge, BridgeSignals, ChildProgress, ChildSignal};
pub use delegate::{derive_child, Delegation};
pub use error::{CommandOutcome, DerivationError, ProcessError};
pub use machine::{Control, Process, ProcessHandle, WorkStrategy};
pub use work::{Work, WorkContext};
