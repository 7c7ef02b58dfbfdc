use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CurrentUser;
use crate::entities::{dispatch_line_item, dispatch_record};
use crate::errors::ServiceError;
use crate::services::dispatch::DispatchRequestItem;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateDispatchRequest {
    pub work_order_id: Uuid,
    pub items: Vec<DispatchRequestItem>,
}

#[derive(Debug, Serialize)]
pub struct DispatchDetails {
    pub record: dispatch_record::Model,
    pub line_items: Vec<dispatch_line_item::Model>,
}

async fn create_dispatch(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateDispatchRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let outcome = state
        .services
        .dispatch
        .dispatch(payload.work_order_id, payload.items, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(outcome))))
}

async fn get_dispatch(
    State(state): State<AppState>,
    Path(dispatch_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let (record, line_items) = state.services.dispatch.get_dispatch(dispatch_id).await?;
    Ok(Json(ApiResponse::success(DispatchDetails {
        record,
        line_items,
    })))
}

async fn mark_delivered(
    State(state): State<AppState>,
    Path(dispatch_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let record = state
        .services
        .dispatch
        .mark_delivered(dispatch_id, &user)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_dispatch))
        .route("/:id", get(get_dispatch))
        .route("/:id/delivered", post(mark_delivered))
}
