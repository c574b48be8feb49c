use anyhow::{bail, Context};
use robot_core::api::{
    DispenseRequest, DispenseResponse, ErrorBody, SnapshotRequest, SnapshotResponse, StatusResponse,
};
use serde::de::DeserializeOwned;

/// Thin client for the robot service HTTP API.
pub struct RobotClient {
    http: reqwest::Client,
    base_url: String,
}

impl RobotClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn dispense(&self, req: &DispenseRequest) -> anyhow::Result<DispenseResponse> {
        let url = format!("{}/robot/dispense", self.base_url);
        let resp = self.http.post(url).json(req).send().await?;
        decode(resp).await
    }

    pub async fn status(&self, cmd_id: &str) -> anyhow::Result<StatusResponse> {
        let url = format!("{}/robot/{}/status", self.base_url, cmd_id);
        let resp = self.http.get(url).send().await?;
        decode(resp).await
    }

    /// Waits for the target pose on the server, then returns the snapshot URL.
    pub async fn pose_snapshot(&self, cmd_id: &str, cam: &str) -> anyhow::Result<SnapshotResponse> {
        let url = format!("{}/robot/{}/pose-snapshot", self.base_url, cmd_id);
        let resp = self.http.get(url).query(&[("cam", cam)]).send().await?;
        decode(resp).await
    }

    pub async fn snapshot(&self, req: &SnapshotRequest) -> anyhow::Result<SnapshotResponse> {
        let url = format!("{}/snapshot", self.base_url);
        let resp = self.http.post(url).json(req).send().await?;
        decode(resp).await
    }
}

/// Decodes a success body, or turns the service's `{"error": ..}` body into
/// an error message.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<T>().await.context("decode response");
    }
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => bail!("{status}: {}", body.error),
        Err(_) => bail!("{status}: {text}"),
    }
}
