//! Request-side orchestration: dispense, status and pose-confirmed snapshots.

use std::sync::Arc;

use metrics::{counter, histogram};
use robot_core::api::{DispenseRequest, DispenseResponse, InferenceRequest, SnapshotResponse, StatusResponse};
use robot_core::model::TaskStatus;
use robot_core::new_task_id;
use robot_core::validation::{validate_camera_id, validate_dispense};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::inference::InferenceClient;
use crate::metrics::{REQUESTS_TOTAL, REQUEST_LATENCY};
use crate::registry::TaskRegistry;
use crate::snapshot::SnapshotBridge;
use crate::telemetry::TelemetrySubscriber;
use crate::waiters::PoseWaiters;

/// Main service implementing the dispense and snapshot operations.
pub struct RobotService {
    config: ServiceConfig,
    registry: Arc<TaskRegistry>,
    waiters: PoseWaiters,
    inference: Arc<dyn InferenceClient>,
    snapshots: SnapshotBridge,
}

impl RobotService {
    pub fn new(
        config: ServiceConfig,
        registry: Arc<TaskRegistry>,
        waiters: PoseWaiters,
        inference: Arc<dyn InferenceClient>,
        snapshots: SnapshotBridge,
    ) -> Self {
        Self {
            config,
            registry,
            waiters,
            inference,
            snapshots,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn waiters(&self) -> &PoseWaiters {
        &self.waiters
    }

    /// Subscriber sharing this service's registry and waiter set.
    pub fn telemetry_subscriber(&self) -> TelemetrySubscriber {
        TelemetrySubscriber::new(
            self.config.pose_target.clone(),
            Arc::clone(&self.registry),
            self.waiters.clone(),
        )
    }

    /// Validates the request, registers a `running` task and hands the
    /// instruction to the inference endpoint.
    pub async fn dispense(&self, req: &DispenseRequest) -> Result<DispenseResponse, ServiceError> {
        counter!(REQUESTS_TOTAL).increment(1);
        let started = Instant::now();
        let result = self.dispense_inner(req).await;
        histogram!(REQUEST_LATENCY).record(started.elapsed().as_secs_f64());
        result
    }

    async fn dispense_inner(&self, req: &DispenseRequest) -> Result<DispenseResponse, ServiceError> {
        let valid = validate_dispense(req)?;

        let cmd_id = new_task_id();
        self.registry.create(&cmd_id);
        info!(
            cmd_id = %cmd_id,
            mix_id = valid.mix_id,
            run_id = valid.run_id,
            colour = %valid.colour,
            volume_ml = valid.volume_ml,
            "dispense task created"
        );

        let inference_req = InferenceRequest {
            model: self.config.model_id.clone(),
            prompt: valid.instruction(),
        };

        match self.inference.predict(&inference_req).await {
            Ok(resp) => {
                let record = match resp.predicted_squeeze_sec {
                    Some(seconds) => self.registry.set_predicted_duration(&cmd_id, seconds)?,
                    None => self.registry.get(&cmd_id)?,
                };
                info!(
                    cmd_id = %cmd_id,
                    predicted_duration_seconds = ?record.predicted_duration_seconds,
                    "inference accepted"
                );
                Ok(DispenseResponse::new(cmd_id, &record))
            }
            Err(err) => {
                warn!(cmd_id = %cmd_id, error = %err, "inference call failed; marking task failed");
                self.mark_failed(&cmd_id);
                Err(err.into())
            }
        }
    }

    pub fn status(&self, cmd_id: &str) -> Result<StatusResponse, ServiceError> {
        let record = self.registry.get(cmd_id)?;
        Ok(StatusResponse::from(&record))
    }

    /// Blocks until the actuator reaches the target pose (bounded by the
    /// configured wait), then captures and uploads a snapshot.
    pub async fn pose_snapshot(&self, cmd_id: &str, cam_id: &str) -> Result<SnapshotResponse, ServiceError> {
        validate_camera_id(cam_id)?;
        self.registry.get(cmd_id)?;

        let event = self
            .waiters
            .wait_for_convergence(cmd_id, self.config.pose_wait_timeout)
            .await?;
        debug!(cmd_id, joints = ?event.joints, "pose reached");

        self.snapshot(cmd_id, cam_id).await
    }

    /// Captures and uploads a snapshot right away.
    pub async fn snapshot(&self, cmd_id: &str, cam_id: &str) -> Result<SnapshotResponse, ServiceError> {
        validate_camera_id(cam_id)?;
        match self.snapshots.capture(cmd_id, cam_id).await {
            Ok(url) => Ok(SnapshotResponse { url }),
            Err(err) => {
                self.mark_failed(cmd_id);
                Err(err.into())
            }
        }
    }

    /// Terminal tasks keep their status; unknown ids are skipped.
    fn mark_failed(&self, cmd_id: &str) {
        if let Err(err) = self.registry.set_status(cmd_id, TaskStatus::Failed) {
            debug!(error = %err, "no task to mark failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use robot_core::api::InferenceResponse;
    use robot_core::model::{PoseTarget, TelemetryEvent};
    use robot_core::validation::ValidationError;

    use super::*;
    use crate::error::DownstreamError;
    use crate::snapshot::{CameraClient, MemorySnapshotStore};

    enum Reply {
        Seconds(Option<f64>),
        Status(u16),
        Timeout,
    }

    /// Inference fake that records what the registry looked like when it
    /// was called.
    struct FakeInference {
        registry: Arc<TaskRegistry>,
        reply: Reply,
        calls: Mutex<Vec<(InferenceRequest, Vec<TaskStatus>)>>,
    }

    #[async_trait]
    impl InferenceClient for FakeInference {
        async fn predict(&self, req: &InferenceRequest) -> Result<InferenceResponse, DownstreamError> {
            let statuses = self.registry.list().into_iter().map(|(_, r)| r.status).collect();
            self.calls.lock().push((req.clone(), statuses));
            match self.reply {
                Reply::Seconds(predicted_squeeze_sec) => Ok(InferenceResponse { predicted_squeeze_sec }),
                Reply::Status(status) => Err(DownstreamError::Status {
                    service: "inference endpoint",
                    status,
                }),
                Reply::Timeout => Err(DownstreamError::Timeout {
                    service: "inference endpoint",
                    timeout: Duration::from_secs(60),
                }),
            }
        }
    }

    struct FakeCamera {
        ok: bool,
    }

    #[async_trait]
    impl CameraClient for FakeCamera {
        async fn capture(&self, _cam_id: &str) -> Result<Bytes, DownstreamError> {
            if self.ok {
                Ok(Bytes::from_static(b"\xff\xd8jpeg"))
            } else {
                Err(DownstreamError::Status {
                    service: "camera endpoint",
                    status: 503,
                })
            }
        }
    }

    fn service(reply: Reply, camera_ok: bool) -> (Arc<RobotService>, Arc<FakeInference>) {
        let registry = Arc::new(TaskRegistry::new());
        let inference = Arc::new(FakeInference {
            registry: Arc::clone(&registry),
            reply,
            calls: Mutex::new(Vec::new()),
        });
        let target = PoseTarget::new(vec![0.0, 0.0], 0.1).unwrap();
        let config = ServiceConfig::new("http://phosphobot", "test-model", target);
        let snapshots = SnapshotBridge::new(
            Arc::new(FakeCamera { ok: camera_ok }),
            Arc::new(MemorySnapshotStore::new()),
            config.snapshot_url_ttl,
        );
        let svc = RobotService::new(
            config,
            registry,
            PoseWaiters::new(),
            inference.clone(),
            snapshots,
        );
        (Arc::new(svc), inference)
    }

    fn request(colour: &str, volume_ml: f64) -> DispenseRequest {
        DispenseRequest {
            mix_id: 1,
            run_id: 2,
            colour: colour.into(),
            volume_ml,
        }
    }

    #[tokio::test]
    async fn dispense_records_predicted_duration() {
        let (svc, inference) = service(Reply::Seconds(Some(1.23)), true);

        let resp = svc.dispense(&request("red", 10.0)).await.unwrap();
        assert_eq!(resp.status, TaskStatus::Running);
        assert_eq!(resp.predicted_duration_seconds, Some(1.23));
        assert!(!resp.cmd_id.is_empty());

        let status = svc.status(&resp.cmd_id).unwrap();
        assert_eq!(status.status, TaskStatus::Running);
        assert_eq!(status.predicted_duration_seconds, Some(1.23));

        let calls = inference.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.model, "test-model");
        assert_eq!(calls[0].0.prompt, "Dispense 10.0 ml from the red bottle");
    }

    #[tokio::test]
    async fn task_is_running_before_inference_is_called() {
        let (svc, inference) = service(Reply::Seconds(None), true);
        let resp = svc.dispense(&request("blue", 5.0)).await.unwrap();

        let calls = inference.calls.lock();
        assert_eq!(calls[0].1, vec![TaskStatus::Running]);
        assert_eq!(resp.predicted_duration_seconds, None);
    }

    #[tokio::test]
    async fn inference_failure_marks_task_failed() {
        for reply in [Reply::Status(500), Reply::Status(422), Reply::Timeout] {
            let (svc, _) = service(reply, true);
            let err = svc.dispense(&request("green", 1.0)).await.unwrap_err();
            assert!(matches!(err, ServiceError::Downstream(_)));

            let tasks = svc.registry().list();
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].1.status, TaskStatus::Failed);
        }
    }

    #[tokio::test]
    async fn invalid_volume_creates_no_task() {
        let (svc, inference) = service(Reply::Seconds(Some(1.0)), true);
        let err = svc.dispense(&request("red", 75.0)).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::Volume(v)) if v == 75.0
        ));
        assert!(svc.registry().is_empty());
        assert!(inference.calls.lock().is_empty());
    }

    #[test]
    fn unknown_status_is_not_found() {
        let (svc, _) = service(Reply::Seconds(None), true);
        assert!(matches!(svc.status("missing"), Err(ServiceError::NotFound(id)) if id == "missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn pose_snapshot_times_out_without_convergence() {
        let (svc, _) = service(Reply::Seconds(Some(1.0)), true);
        let cmd_id = svc.dispense(&request("red", 10.0)).await.unwrap().cmd_id;

        let err = svc.pose_snapshot(&cmd_id, "top_cam").await.unwrap_err();
        assert!(matches!(err, ServiceError::PoseTimeout(t) if t == Duration::from_secs(30)));
        assert!(svc.waiters().is_empty());
    }

    #[tokio::test]
    async fn pose_snapshot_for_unknown_task_does_not_wait() {
        let (svc, _) = service(Reply::Seconds(None), true);
        let err = svc.pose_snapshot("nope", "top_cam").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(svc.waiters().is_empty());
    }

    #[tokio::test]
    async fn convergence_releases_pose_snapshot() {
        let (svc, _) = service(Reply::Seconds(Some(1.0)), true);
        let cmd_id = svc.dispense(&request("red", 10.0)).await.unwrap().cmd_id;

        let waiting = {
            let svc = Arc::clone(&svc);
            let cmd_id = cmd_id.clone();
            tokio::spawn(async move { svc.pose_snapshot(&cmd_id, "top_cam").await })
        };
        while svc.waiters().is_empty() {
            tokio::task::yield_now().await;
        }

        let outcome = svc.telemetry_subscriber().handle_event(&TelemetryEvent {
            joints: vec![0.01, -0.02],
            status: None,
        });
        assert_eq!(outcome.waiters_resolved, 1);

        let resp = waiting.await.unwrap().unwrap();
        assert!(resp
            .url
            .starts_with(&format!("memory://localhost/{cmd_id}/top_cam_")));
    }

    #[tokio::test]
    async fn camera_id_outside_one_segment_is_rejected_before_any_work() {
        let (svc, _) = service(Reply::Seconds(Some(1.0)), true);
        let cmd_id = svc.dispense(&request("red", 10.0)).await.unwrap().cmd_id;

        for cam in ["../../inference", "a/b", "cam?x=1", ""] {
            let err = svc.pose_snapshot(&cmd_id, cam).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(ValidationError::Camera(_))), "{cam}");
            assert!(svc.waiters().is_empty());

            let err = svc.snapshot(&cmd_id, cam).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(ValidationError::Camera(_))), "{cam}");
        }
        assert_eq!(svc.status(&cmd_id).unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn snapshot_failure_marks_running_task_failed() {
        let (svc, _) = service(Reply::Seconds(Some(1.0)), false);
        let cmd_id = svc.dispense(&request("red", 10.0)).await.unwrap().cmd_id;

        let err = svc.snapshot(&cmd_id, "top_cam").await.unwrap_err();
        assert!(matches!(err, ServiceError::Downstream(DownstreamError::Status { status: 503, .. })));
        assert_eq!(svc.status(&cmd_id).unwrap().status, TaskStatus::Failed);

        // Unknown ids still surface the downstream error.
        assert!(matches!(
            svc.snapshot("unknown", "top_cam").await,
            Err(ServiceError::Downstream(_))
        ));
    }
}
