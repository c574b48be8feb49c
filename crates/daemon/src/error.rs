use std::time::Duration;

use robot_core::validation::ValidationError;
use thiserror::Error;

/// Failure of a call to an external collaborator (inference, camera,
/// object storage).
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("{service} did not answer within {timeout:?}")]
    Timeout {
        service: &'static str,
        timeout: Duration,
    },
    #[error("{service} returned HTTP {status}")]
    Status { service: &'static str, status: u16 },
    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
    #[error("{service} returned an unreadable body: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
    #[error("object storage {operation} failed: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl DownstreamError {
    /// Classifies a reqwest failure for `service`.
    pub(crate) fn from_reqwest(service: &'static str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service, timeout }
        } else if err.is_decode() {
            Self::Decode {
                service,
                message: err.to_string(),
            }
        } else {
            Self::Transport {
                service,
                message: err.to_string(),
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors surfaced to callers of [`crate::service::RobotService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("task {0} not found")]
    NotFound(String),
    #[error("pose not reached within {0:?}")]
    PoseTimeout(Duration),
    #[error("pose wait cancelled")]
    WaitCancelled,
    #[error(transparent)]
    Downstream(#[from] DownstreamError),
}
