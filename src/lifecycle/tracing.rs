//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing_subscriber` formatter driven by
//! `RUST_LOG`. Calling it again (e.g. from several tests) is harmless.
//!
//! ## What Gets Traced
//!
//! - **Consumers**: startup, skipped deliveries, shutdown (`worker_id`)
//! - **Processes**: every status broadcast at `debug`, settlement at `info` (`task_id`, `status`)
//! - **Delegation**: child derivation, submission, forwarded commands (`child_id`)
//! - **Channels**: handles opened/closed at `debug`, lagging subscribers at `warn`
//! - **Liveness**: unresponsive and recovered workers
//!
//! ## Usage Examples
//!
//! ```bash
//! # Settlements and lifecycle only
//! RUST_LOG=info cargo run
//!
//! # Every broadcast and handle
//! RUST_LOG=debug cargo run
//!
//! # Just the delegation path
//! RUST_LOG=scan_relay::process=debug cargo run
//! ```
//!
//! ## Workflow Trace Example
//!
//! A delegated scan with `RUST_LOG=info`:
//!
//! ```text
//! INFO consumer: Process started task_id=5d0c.. variant="delegated" blocking=true
//! INFO consumer: Derived child task task_id=5d0c.. child_id=91af.. queue="scan.SUBMIT_QUEUE"
//! INFO consumer: Submitted child task task_id=5d0c.. child_id=91af..
//! INFO consumer:process: Scan started task_id=91af.. points=5
//! INFO consumer:process: Work settled task_id=91af.. status=COMPLETE
//! INFO consumer: Parent settled task_id=5d0c.. status=COMPLETE message="Scan completed successfully"
//! ```
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // Module paths are noise next to task_id/worker_id fields
        .compact()
        .try_init();
}
