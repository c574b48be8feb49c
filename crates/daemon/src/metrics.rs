//! Prometheus metrics for the robot service.
//!
//! The recorder is process-wide; the scrape endpoint is served by its own
//! router on a separate port.

use std::sync::OnceLock;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

/// Dispense requests received.
pub const REQUESTS_TOTAL: &str = "robot_requests_total";

/// Latency of the dispense path, seconds.
pub const REQUEST_LATENCY: &str = "robot_request_latency_seconds";

/// Snapshots captured and uploaded.
pub const SNAPSHOT_OK: &str = "cam_snapshot_ok_total";

/// Snapshots that failed at capture or upload.
pub const SNAPSHOT_ERR: &str = "cam_snapshot_err_total";

pub const POSE_WAITERS_RESOLVED: &str = "robot_pose_waiters_resolved_total";
pub const TELEMETRY_INVALID: &str = "robot_telemetry_invalid_total";
pub const TASKS_EVICTED: &str = "robot_tasks_evicted_total";

/// Bucket bounds (seconds) for the dispense latency histogram; the top
/// bucket covers the inference timeout.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL: Mutex<()> = Mutex::new(());

/// Installs the global Prometheus recorder. Later (or concurrent) calls
/// return the same handle.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let _install = INSTALL.lock();
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_LATENCY.to_string()), LATENCY_BUCKETS)?
        .install_recorder()?;

    describe_counter!(REQUESTS_TOTAL, "Robot dispense requests");
    describe_histogram!(REQUEST_LATENCY, "Robot latency");
    describe_counter!(SNAPSHOT_OK, "Snapshots succeeded");
    describe_counter!(SNAPSHOT_ERR, "Snapshots failed");
    describe_counter!(
        POSE_WAITERS_RESOLVED,
        "Pose waiters resolved by a convergent telemetry event"
    );
    describe_counter!(TELEMETRY_INVALID, "Telemetry events dropped as invalid");
    describe_counter!(TASKS_EVICTED, "Tasks evicted by the retention sweep");

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Scrape router: `GET /metrics`.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_is_installed_once_and_renders() {
        let first = init_metrics().unwrap();
        let second = init_metrics().unwrap();

        metrics::counter!(REQUESTS_TOTAL).increment(1);
        let text = second.render();
        assert!(text.contains(REQUESTS_TOTAL), "{text}");
        assert!(first.render().contains(REQUESTS_TOTAL));
    }

    #[test]
    fn concurrent_first_calls_all_succeed() {
        let handles: Vec<_> = (0..8).map(|_| std::thread::spawn(init_metrics)).collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
    }

    #[test]
    fn request_latency_is_a_bucketed_histogram() {
        let handle = init_metrics().unwrap();
        metrics::histogram!(REQUEST_LATENCY).record(0.2);

        let text = handle.render();
        assert!(
            text.contains("# TYPE robot_request_latency_seconds histogram"),
            "{text}"
        );
        assert!(
            text.contains(r#"robot_request_latency_seconds_bucket{le="0.25"}"#),
            "{text}"
        );
        assert!(text.contains(r#"robot_request_latency_seconds_bucket{le="+Inf"}"#));
    }
}
