pub(crate) const METRIC_SHUTDOWN_INITIATED: &str = "lifecycle_shutdown_initiated_total";
pub(crate) const METRIC_SHUTDOWN_COMPLETED: &str = "lifecycle_shutdown_completed_total";
pub(crate) const METRIC_STEP_SHUTDOWN_DURATION: &str = "lifecycle_step_shutdown_duration_seconds";

pub(crate) fn emit_shutdown_initiated(trigger_reason: &str) {
    let labels = [("trigger_reason", trigger_reason.to_string())];
    metrics::counter!(METRIC_SHUTDOWN_INITIATED, &labels).increment(1);
}

pub(crate) fn emit_shutdown_completed(clean: bool) {
    let labels = [("clean", clean.to_string())];
    metrics::counter!(METRIC_SHUTDOWN_COMPLETED, &labels).increment(1);
}

pub(crate) fn emit_step_shutdown_duration(step: &str, result: &str, duration_secs: f64) {
    let labels = [("step", step.to_string()), ("result", result.to_string())];
    metrics::histogram!(METRIC_STEP_SHUTDOWN_DURATION, &labels).record(duration_secs);
}
