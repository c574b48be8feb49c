use std::time::Duration;

use anyhow::Context;
use robot_core::model::PoseTarget;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the actuator host (inference and camera endpoints).
    pub phos_url: String,
    pub model_id: String,
    pub pose_target: PoseTarget,

    pub inference_timeout: Duration,
    pub camera_timeout: Duration,
    pub pose_wait_timeout: Duration,
    pub snapshot_url_ttl: Duration,

    pub gc_interval: Duration,
    pub retention: Duration,
}

impl ServiceConfig {
    /// Config with the deployment's default timeouts and retention.
    pub fn new(phos_url: impl Into<String>, model_id: impl Into<String>, pose_target: PoseTarget) -> Self {
        Self {
            phos_url: phos_url.into(),
            model_id: model_id.into(),
            pose_target,
            inference_timeout: Duration::from_secs(60),
            camera_timeout: Duration::from_secs(10),
            pose_wait_timeout: Duration::from_secs(30),
            snapshot_url_ttl: Duration::from_secs(24 * 60 * 60),
            gc_interval: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    /// Custom S3 endpoint (MinIO and friends); AWS when unset.
    pub endpoint: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub endpoint: String,
    pub topic: String,
}

/// Parses a JSON array of numbers, e.g. `[0, 0.5, -1]`.
pub fn parse_pose_vector(raw: &str) -> anyhow::Result<Vec<f64>> {
    serde_json::from_str(raw).with_context(|| format!("target pose must be a JSON number array: {raw:?}"))
}

/// Parses and validates the target pose.
pub fn pose_target(raw_pose: &str, tolerance: f64) -> anyhow::Result<PoseTarget> {
    let joints = parse_pose_vector(raw_pose)?;
    PoseTarget::new(joints, tolerance).context("invalid target pose")
}
