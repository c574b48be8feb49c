use serde::{Deserialize, Serialize};

use crate::model::{TaskRecord, TaskStatus};

/// Camera used when a caller does not name one.
pub const DEFAULT_CAMERA: &str = "top_cam";

fn default_camera() -> String {
    DEFAULT_CAMERA.to_string()
}

/// Dispense request (`POST /robot/dispense`).
///
/// `colour` stays a string here so an unknown value is reported as a
/// validation error rather than a body-decoding error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispenseRequest {
    pub mix_id: i64,
    pub run_id: i64,
    pub colour: String,
    pub volume_ml: f64,
}

/// Dispense response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispenseResponse {
    pub cmd_id: String,
    pub status: TaskStatus,
    pub predicted_duration_seconds: Option<f64>,
    /// Same value as `predicted_duration_seconds`, kept for older callers.
    pub predicted_squeeze_sec: Option<f64>,
}

impl DispenseResponse {
    /// Builds the response for a task record.
    pub fn new(cmd_id: String, record: &TaskRecord) -> Self {
        Self {
            cmd_id,
            status: record.status,
            predicted_duration_seconds: record.predicted_duration_seconds,
            predicted_squeeze_sec: record.predicted_duration_seconds,
        }
    }
}

/// Task status response (`GET /robot/{cmd_id}/status`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub status: TaskStatus,
    pub predicted_duration_seconds: Option<f64>,
    pub predicted_squeeze_sec: Option<f64>,
}

impl From<&TaskRecord> for StatusResponse {
    fn from(record: &TaskRecord) -> Self {
        Self {
            status: record.status,
            predicted_duration_seconds: record.predicted_duration_seconds,
            predicted_squeeze_sec: record.predicted_duration_seconds,
        }
    }
}

/// Query string of `GET /robot/{cmd_id}/pose-snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseSnapshotQuery {
    #[serde(default = "default_camera")]
    pub cam: String,
}

/// Direct snapshot request (`POST /snapshot`), no pose wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub cmd_id: String,
    #[serde(default = "default_camera")]
    pub cam_id: String,
}

/// Snapshot response: a time-limited URL of the uploaded image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotResponse {
    pub url: String,
}

/// Body sent to the inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
}

/// Body returned by the inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceResponse {
    #[serde(default)]
    pub predicted_squeeze_sec: Option<f64>,
}

/// Error body returned by the service for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
