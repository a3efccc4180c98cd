//! Scan positions, estimates, and the in-place scan work.
//!
//! - [`ArrayGenerator`] - Validated single-axis position list with a lazy [`Position`] sequence
//! - [`ScanEstimate`] - Point count, rank and duration of a scan
//! - [`ScanWork`] - [`Work`](crate::process::Work) that steps through a scan

pub mod estimate;
pub mod generator;
pub mod work;

pub use estimate::ScanEstimate;
pub use generator::{ArrayGenerator, Position, Positions};
pub use work::ScanWork;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScanError {
    #[error("A scan axis name is required")]
    MissingAxis,

    #[error("No positions given for axis {axis}")]
    NoPositions { axis: String },

    #[error("Cannot estimate an empty scan")]
    EmptyScan,
}
