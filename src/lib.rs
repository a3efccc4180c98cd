//! # Scan Relay
//!
//! > **Long-running scan tasks over a message bus, with delegation between services.**
//!
//! A task is submitted to a queue, picked up by a consumer, and executed by a
//! process that drives its status from SUBMITTED to one of COMPLETE, FAILED or
//! TERMINATED, publishing every step on a status topic. A process can also
//! hand its work to another service as a child task and mirror that child's
//! lifecycle back onto the parent.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### One state machine, two strategies
//! [`Process`](process::Process) is written once. What it does comes from a
//! [`WorkStrategy`](process::WorkStrategy): work done in place, or a
//! delegation to another service. Pause and resume are honoured by in-place
//! work; for delegated work they are refused with an error and leave the task
//! unchanged.
//!
//! ### One mutation path
//! [`ProcessHandle::broadcast`](process::ProcessHandle::broadcast) validates,
//! applies and publishes each update under one lock. Terminal status is final,
//! so a terminate command that loses the race with completion is discarded
//! with a log line, never applied.
//!
//! ### One synchronization point
//! A delegating process waits on a one-shot signal that its
//! [`Bridge`](process::Bridge) fires on the child's first decisive status.
//! The bridge holds only the child id and the sending ends; it never touches
//! the parent task.
//!
//! ### Scoped channels
//! Every queue and topic handle is released by `disconnect`/`unsubscribe` or,
//! failing that, on drop. [`InMemoryBroker`](fabric::InMemoryBroker) counts
//! open handles so tests can prove nothing leaks.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Data ([`model`])
//! [`Task`](model::Task), [`Status`](model::Status) and its transition graph,
//! [`Command`](model::Command), [`HeartbeatBeacon`](model::HeartbeatBeacon).
//!
//! ### 2. The Transport ([`fabric`])
//! The [`Broker`](fabric::Broker) trait, scoped handles, listener capabilities
//! with no-op defaults, and [`ScriptedService`](fabric::mock::ScriptedService)
//! for tests.
//!
//! ### 3. The Engine ([`process`])
//! The status state machine, in-place [`Work`](process::Work), and delegation.
//!
//! ### 4. The Workers ([`consumer`], [`heartbeat`])
//! Queue consumers with command routing and duplicate tolerance; beacons and
//! the missed-beat policy.
//!
//! ### 5. The Work Itself ([`scan`])
//! Position generation, scan estimates, and [`ScanWork`](scan::ScanWork).
//!
//! ### 6. The Edges ([`clients`], [`lifecycle`], [`config`])
//! Submission and control from the caller's side, system wiring and tracing,
//! typed settings with defaults.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run the demo with info logs
//! RUST_LOG=info cargo run
//!
//! # Run the tests
//! cargo test
//! ```

pub mod clients;
pub mod config;
pub mod consumer;
pub mod fabric;
pub mod heartbeat;
pub mod lifecycle;
pub mod model;
pub mod process;
pub mod scan;
