//! # System Lifecycle & Orchestration
//!
//! Services are simple on their own; wiring them together is where the
//! complexity lives. [`ScanSystem`] is the conductor:
//!
//! 1. **Transport** - one [`InMemoryBroker`](crate::fabric::InMemoryBroker) shared by everything
//! 2. **Services** - the scan service starts before the queue service that delegates to it
//! 3. **Liveness** - a [`LivenessMonitor`](crate::heartbeat::LivenessMonitor) on the shared heartbeat topic
//! 4. **Shutdown** - upstream first, so no child is delegated to a stopped service
//!
//! Every collaborator is handed over explicitly at construction; nothing is
//! looked up from global state.
//!
//! [`setup_tracing`] initializes logging for binaries and tests.

pub mod scan_system;
pub mod tracing;

pub use self::tracing::setup_tracing;
pub use scan_system::*;
