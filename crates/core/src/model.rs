use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a dispense task.
///
/// Transitions are monotonic: `running` may become `success` or `failed`,
/// and a terminal status never changes again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Command dispatched (or being dispatched); completion not yet observed.
    Running,
    /// Telemetry reported the command as completed.
    Success,
    /// The dispatch to the inference endpoint failed.
    Failed,
}

impl TaskStatus {
    /// True for `success` and `failed`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one task as seen by readers of the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Execution time predicted by the inference endpoint, once it answered.
    pub predicted_duration_seconds: Option<f64>,
    /// Creation time (unix epoch milliseconds).
    pub created_at_ms: i64,
}

/// Paint bottle a dispense command draws from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Colour {
    /// The red bottle.
    Red,
    /// The green bottle.
    Green,
    /// The blue bottle.
    Blue,
}

impl Colour {
    /// Wire name of the colour.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
        }
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Colour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Self::Red),
            "green" => Ok(Self::Green),
            "blue" => Ok(Self::Blue),
            other => Err(other.to_string()),
        }
    }
}

/// Why a pose target was rejected at startup.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoseTargetError {
    /// The target vector has no components.
    #[error("target pose must have at least one joint")]
    Empty,
    /// A target component is NaN or infinite.
    #[error("target pose joint {index} is not a finite number")]
    NonFiniteJoint {
        /// Offending component.
        index: usize,
    },
    /// Tolerance is not a finite, strictly positive number.
    #[error("tolerance must be a finite number > 0 (got {0})")]
    InvalidTolerance(f64),
}

/// Target joint configuration plus the componentwise tolerance used to
/// decide convergence.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseTarget {
    joints: Vec<f64>,
    tolerance: f64,
}

impl PoseTarget {
    /// Builds a validated target.
    pub fn new(joints: Vec<f64>, tolerance: f64) -> Result<Self, PoseTargetError> {
        if joints.is_empty() {
            return Err(PoseTargetError::Empty);
        }
        if let Some(index) = joints.iter().position(|j| !j.is_finite()) {
            return Err(PoseTargetError::NonFiniteJoint { index });
        }
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(PoseTargetError::InvalidTolerance(tolerance));
        }
        Ok(Self { joints, tolerance })
    }

    /// Target joint values.
    pub fn joints(&self) -> &[f64] {
        &self.joints
    }

    /// Componentwise tolerance.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// True iff `q` has the target's length and every component is strictly
    /// within tolerance of the corresponding target component.
    pub fn is_converged(&self, q: &[f64]) -> bool {
        q.len() == self.joints.len()
            && q
                .iter()
                .zip(&self.joints)
                .all(|(actual, target)| (actual - target).abs() < self.tolerance)
    }
}

/// Status string the actuator reports once a command has completed.
pub const SUCCESS_STATUS: &str = "success";

/// One validated actuator-state event from the telemetry feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEvent {
    /// Reported joint configuration.
    pub joints: Vec<f64>,
    /// Optional command status reported alongside the joints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A feed message that could not be turned into a [`TelemetryEvent`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvalidEvent {
    /// Payload is not the expected JSON object.
    #[error("malformed telemetry payload: {0}")]
    Malformed(String),
    /// Payload has no `joints` array.
    #[error("telemetry payload has no joints")]
    MissingJoints,
}

#[derive(Deserialize)]
struct RawTelemetryEvent {
    #[serde(default)]
    joints: Option<Vec<f64>>,
    #[serde(default)]
    status: Option<String>,
}

impl TelemetryEvent {
    /// Parses and validates a raw feed payload.
    pub fn parse(raw: &[u8]) -> Result<Self, InvalidEvent> {
        let raw: RawTelemetryEvent =
            serde_json::from_slice(raw).map_err(|e| InvalidEvent::Malformed(e.to_string()))?;
        let joints = raw.joints.ok_or(InvalidEvent::MissingJoints)?;
        Ok(Self {
            joints,
            status: raw.status,
        })
    }

    /// True when the event carries the actuator's completion signal.
    pub fn reports_success(&self) -> bool {
        self.status.as_deref() == Some(SUCCESS_STATUS)
    }
}
