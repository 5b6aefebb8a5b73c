//! Retry and quality-gate policy for executed steps.

use crate::core::error::StepError;
use crate::core::types::{StepOutcome, StepStatus, TaskRuntime};

/// Clamp a reported quality score into `[0, 1]`; NaN scores count as zero.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Apply the retry policy to step `id` after it ran.
///
/// A score strictly above `threshold` succeeds. Otherwise the step is reset
/// to `pending` while `attempt < max_attempts`, and fails for good after that.
/// Succeeded and failed steps leave the ready queue; retried steps keep their
/// position so they are dequeued again next.
pub fn evaluate_step(
    runtime: &mut TaskRuntime,
    id: &str,
    threshold: f64,
) -> Result<StepOutcome, StepError> {
    let step = runtime
        .step_mut(id)
        .ok_or_else(|| StepError::UnknownStep(id.to_string()))?;

    let outcome = if step.quality_score() > threshold {
        step.status = StepStatus::Done;
        StepOutcome::Success
    } else if step.attempt < step.max_attempts {
        step.status = StepStatus::Pending;
        step.attempt += 1;
        StepOutcome::Retry
    } else {
        step.status = StepStatus::Failed;
        StepOutcome::Fail
    };

    match outcome {
        StepOutcome::Success => runtime.mark_completed(id),
        StepOutcome::Fail => runtime.remove_from_queue(id),
        StepOutcome::Retry => {}
    }
    Ok(outcome)
}
