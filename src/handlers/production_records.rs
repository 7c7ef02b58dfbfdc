use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::CurrentUser;
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub production_line_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QuantityUpdateRequest {
    #[validate(range(min = 1))]
    pub delta: i32,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approved: bool,
    pub remarks: Option<String>,
}

async fn create_record(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateRecordRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let record = state
        .services
        .production
        .create_record(payload.production_line_id, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(record))))
}

async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let record = state.services.production.get_record(record_id).await?;
    Ok(Json(ApiResponse::success(record)))
}

async fn list_logs(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let logs = state.services.production.list_logs(record_id).await?;
    Ok(Json(ApiResponse::success(logs)))
}

async fn start(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let record = state.services.production.start(record_id, &user).await?;
    Ok(Json(ApiResponse::success(record)))
}

async fn pause(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<PauseRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let record = state
        .services
        .production
        .pause(record_id, payload.reason, &user)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

async fn resume(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let record = state.services.production.resume(record_id, &user).await?;
    Ok(Json(ApiResponse::success(record)))
}

async fn stop(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let record = state.services.production.stop(record_id, &user).await?;
    Ok(Json(ApiResponse::success(record)))
}

async fn update_quantity(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<QuantityUpdateRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    payload.validate()?;
    let snapshot = state
        .services
        .production
        .update_quantity(record_id, payload.delta, &user)
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn review(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ReviewRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let record = state
        .services
        .production
        .review(record_id, payload.approved, payload.remarks, &user)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_record))
        .route("/:id", get(get_record))
        .route("/:id/logs", get(list_logs))
        .route("/:id/start", post(start))
        .route("/:id/pause", post(pause))
        .route("/:id/resume", post(resume))
        .route("/:id/stop", post(stop))
        .route("/:id/quantity", post(update_quantity))
        .route("/:id/review", post(review))
}
