use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::metrics;
use crate::db::Database;
use crate::learning::{LearningService, StartError};
use crate::models::{Category, Detection, DetectionKind, DetectionStats, LabelAssignment, MiningRun};

pub struct AppState {
    pub db: Arc<Database>,
    pub learning: LearningService,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub labels: Vec<LabelAssignment>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub confirmed: u64,
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartLearningRequest {
    pub target: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LearningStatus {
    pub run_id: Option<String>,
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    tracing::error!("Database error: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

pub async fn list_detections(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<Detection>>>, StatusCode> {
    let kind = match params.kind {
        Some(kind) => match kind.parse::<DetectionKind>() {
            Ok(kind) => kind,
            Err(e) => return Ok(Json(ApiResponse::error(e))),
        },
        None => DetectionKind::Active,
    };
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    state
        .db
        .list_detections(kind, limit, offset)
        .await
        .map(|detections| Json(ApiResponse::success(detections)))
        .map_err(internal_error)
}

pub async fn get_detection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Detection>>, StatusCode> {
    match state.db.get_detection(&id).await {
        Ok(Some(detection)) => Ok(Json(ApiResponse::success(detection))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(internal_error(e)),
    }
}

pub async fn get_detection_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    let detection = match state.db.get_detection(&id).await {
        Ok(Some(d)) => d,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => return Err(internal_error(e)),
    };

    let path = std::path::Path::new(&detection.image_path);
    if !path.exists() {
        return Err(StatusCode::NOT_FOUND);
    }

    match ServeFile::new(path).oneshot(axum::http::Request::new(())).await {
        Ok(response) => Ok(response.into_response()),
        Err(e) => {
            tracing::error!("Failed to serve file: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn confirm_labels(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ApiResponse<ConfirmResponse>>, StatusCode> {
    match state.db.confirm_labels(&req.labels).await {
        Ok(confirmed) => {
            metrics::record_detections_confirmed(confirmed);
            Ok(Json(ApiResponse::success(ConfirmResponse { confirmed })))
        }
        Err(e) => {
            tracing::warn!("Label confirmation rejected: {:#}", e);
            Ok(Json(ApiResponse::error(format!("Confirmation failed: {}", e))))
        }
    }
}

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Category>>>, StatusCode> {
    state
        .db
        .list_categories()
        .await
        .map(|categories| Json(ApiResponse::success(categories)))
        .map_err(internal_error)
}

pub async fn add_category(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<ApiResponse<Category>>, StatusCode> {
    match state.db.add_category(&req.name).await {
        Ok(category) => Ok(Json(ApiResponse::success(category))),
        Err(e) => Ok(Json(ApiResponse::error(e.to_string()))),
    }
}

pub async fn rename_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<ApiResponse<Category>>, StatusCode> {
    match state.db.rename_category(id, &req.name).await {
        Ok(Some(category)) => Ok(Json(ApiResponse::success(category))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Ok(Json(ApiResponse::error(e.to_string()))),
    }
}

pub async fn start_learning(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartLearningRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<LearningStatus>>), StatusCode> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    match state.learning.start(req.target).await {
        Ok(handle) => Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(LearningStatus {
                run_id: Some(handle.run_id),
            })),
        )),
        Err(StartError::AlreadyRunning(id)) => Ok((
            StatusCode::CONFLICT,
            Json(ApiResponse::error(format!("Mining run {} is already in progress", id))),
        )),
        Err(StartError::Store(e)) => Err(internal_error(e)),
    }
}

pub async fn cancel_learning(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<LearningStatus>>, StatusCode> {
    match state.learning.cancel() {
        Some(run_id) => Ok(Json(ApiResponse::success(LearningStatus {
            run_id: Some(run_id),
        }))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn learning_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<LearningStatus>> {
    Json(ApiResponse::success(LearningStatus {
        run_id: state.learning.active_run(),
    }))
}

pub async fn list_learning_runs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<MiningRun>>>, StatusCode> {
    state
        .db
        .list_mining_runs(20)
        .await
        .map(|runs| Json(ApiResponse::success(runs)))
        .map_err(internal_error)
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<DetectionStats>>, StatusCode> {
    state
        .db
        .get_stats()
        .await
        .map(|stats| Json(ApiResponse::success(stats)))
        .map_err(internal_error)
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "active-labeler",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
