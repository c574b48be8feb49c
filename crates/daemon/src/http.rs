use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use robot_core::api::{
    DispenseRequest, DispenseResponse, ErrorBody, PoseSnapshotQuery, SnapshotRequest,
    SnapshotResponse, StatusResponse,
};
use robot_core::validation::ValidationError;
use tower_http::trace::TraceLayer;

use crate::error::ServiceError;
use crate::service::RobotService;

#[derive(Clone)]
pub struct AppState {
    svc: Arc<RobotService>,
}

pub fn router(svc: Arc<RobotService>) -> Router {
    let state = AppState { svc };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/robot/dispense", post(dispense))
        .route("/robot/{cmd_id}/status", get(status))
        .route("/robot/{cmd_id}/pose-snapshot", get(pose_snapshot))
        .route("/snapshot", post(snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn dispense(
    State(st): State<AppState>,
    body: Result<Json<DispenseRequest>, JsonRejection>,
) -> Result<Json<DispenseResponse>, AppError> {
    let Json(req) = body.map_err(body_error)?;
    Ok(Json(st.svc.dispense(&req).await?))
}

async fn status(
    State(st): State<AppState>,
    Path(cmd_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    Ok(Json(st.svc.status(&cmd_id)?))
}

async fn pose_snapshot(
    State(st): State<AppState>,
    Path(cmd_id): Path<String>,
    Query(query): Query<PoseSnapshotQuery>,
) -> Result<Json<SnapshotResponse>, AppError> {
    Ok(Json(st.svc.pose_snapshot(&cmd_id, &query.cam).await?))
}

async fn snapshot(
    State(st): State<AppState>,
    body: Result<Json<SnapshotRequest>, JsonRejection>,
) -> Result<Json<SnapshotResponse>, AppError> {
    let Json(req) = body.map_err(body_error)?;
    Ok(Json(st.svc.snapshot(&req.cmd_id, &req.cam_id).await?))
}

fn body_error(rejection: JsonRejection) -> ServiceError {
    ValidationError::Body(rejection.body_text()).into()
}

#[derive(Debug)]
pub struct AppError(ServiceError);

impl<E: Into<ServiceError>> From<E> for AppError {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::PoseTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ServiceError::WaitCancelled => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Downstream(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Downstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::error!(error = %self.0, status = code.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self.0, status = code.as_u16(), "request rejected");
        }
        let body = Json(ErrorBody {
            error: self.0.to_string(),
        });
        (code, body).into_response()
    }
}
