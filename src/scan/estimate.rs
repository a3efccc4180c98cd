use super::{ArrayGenerator, Position, ScanError};
use crate::model::ScanRequest;
use std::time::Duration;

/// Size and duration summary of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanEstimate {
    pub point_count: usize,
    pub rank: usize,
    pub time_per_point: Duration,
    pub estimated_duration: Duration,
}

impl ScanEstimate {
    /// Estimates a scan over `positions`.
    ///
    /// When detector exposures (seconds) are given, the slowest detector sets the
    /// time per point, rounded to the millisecond; otherwise `time_per_point_ms`
    /// is used. The point count comes from an exact size hint when the sequence
    /// has one. Otherwise the whole sequence is walked, so keep this off
    /// latency-sensitive paths for lazily computed scans.
    pub fn new<I>(positions: I, exposures: Option<&[f64]>, time_per_point_ms: u64) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = Position>,
    {
        let mut positions = positions.into_iter();
        let first = positions.next().ok_or(ScanError::EmptyScan)?;
        let rest = match positions.size_hint() {
            (lower, Some(upper)) if lower == upper => lower,
            _ => positions.count(),
        };
        let point_count = rest + 1;

        let per_point_ms = match exposures {
            Some(exposures) if !exposures.is_empty() => exposures
                .iter()
                .map(|secs| (secs * 1000.0).round().max(0.0) as u64)
                .max()
                .unwrap_or(0),
            _ => time_per_point_ms,
        };
        let time_per_point = Duration::from_millis(per_point_ms);

        Ok(Self {
            point_count,
            rank: first.rank(),
            time_per_point,
            estimated_duration: Duration::from_millis(per_point_ms.saturating_mul(point_count as u64)),
        })
    }

    pub fn for_request(request: &ScanRequest) -> Result<Self, ScanError> {
        let generator = ArrayGenerator::from_request(request)?;
        let exposures: Vec<f64> = request.detectors.iter().map(|d| d.exposure_time).collect();
        Self::new(&generator, Some(exposures.as_slice()), request.time_per_point_ms)
    }
}
