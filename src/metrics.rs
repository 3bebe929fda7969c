use tracing::trace;

// Counters and timings are trace events; the Prometheus recorder serves /metrics.

pub fn inc_requests(route: &'static str) {
    trace!(target = "scout.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "scout.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn job_finished(kind: &'static str, outcome: &'static str, attempts: u32) {
    trace!(
        target = "scout.metrics",
        kind = kind,
        outcome = outcome,
        attempts = attempts,
        "jobs_total_inc"
    );
}
