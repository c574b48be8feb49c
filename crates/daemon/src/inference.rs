use std::time::Duration;

use async_trait::async_trait;
use robot_core::api::{InferenceRequest, InferenceResponse};

use crate::error::DownstreamError;

const SERVICE: &str = "inference endpoint";

/// The actuator-control endpoint that turns an instruction into motion.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn predict(&self, req: &InferenceRequest) -> Result<InferenceResponse, DownstreamError>;
}

/// `POST {base_url}/inference` with a bounded timeout. Only `200 OK`
/// counts as accepted.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn predict(&self, req: &InferenceRequest) -> Result<InferenceResponse, DownstreamError> {
        let url = format!("{}/inference", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(req)
            .send()
            .await
            .map_err(|e| DownstreamError::from_reqwest(SERVICE, self.timeout, e))?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(DownstreamError::Status {
                service: SERVICE,
                status: resp.status().as_u16(),
            });
        }

        resp.json::<InferenceResponse>()
            .await
            .map_err(|e| DownstreamError::from_reqwest(SERVICE, self.timeout, e))
    }
}
