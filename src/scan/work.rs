use super::{ArrayGenerator, ScanEstimate};
use crate::model::Payload;
use crate::process::{ProcessError, Work, WorkContext};
use async_trait::async_trait;
use tracing::{debug, info};

/// Runs a scan in place: moves through every position, one point per
/// time-per-point, with a checkpoint before each point.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanWork;

#[async_trait]
impl Work for ScanWork {
    async fn execute(&self, ctx: &mut WorkContext) -> Result<String, ProcessError> {
        let task = ctx.task();
        let request = match &task.payload {
            Payload::Scan(request) => request.clone(),
            Payload::ScanAtom(_) => {
                return Err(ProcessError::Work("Delegated scans cannot run in place".into()))
            }
        };
        let generator = ArrayGenerator::from_request(&request).map_err(|e| ProcessError::Work(e.to_string()))?;
        let estimate = ScanEstimate::for_request(&request).map_err(|e| ProcessError::Work(e.to_string()))?;
        info!(task_id = %task.id, points = estimate.point_count, estimated = ?estimate.estimated_duration, "Scan started");

        let total = generator.len();
        for position in &generator {
            ctx.checkpoint().await?;
            debug!(task_id = %task.id, axis = %position.axis, value = position.value, "Point");
            tokio::time::sleep(estimate.time_per_point).await;
            let done = position.index + 1;
            let percent = done as f64 * 100.0 / total as f64;
            ctx.progress(percent, &format!("Point {done} of {total}"))?;
        }
        ctx.checkpoint().await?;

        Ok(format!("Scanned {total} points along {}", request.axis))
    }
}
