use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::CurrentUser;
use crate::entities::packing_bundle::BundleStage;
use crate::errors::ServiceError;
use crate::services::production::NewProductionLine;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductionLineRequest {
    pub job_order_id: Uuid,
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub product_code: String,
    pub bar_mark: Option<String>,
    pub unit_weight_kg: Option<Decimal>,
    #[validate(range(min = 0))]
    pub planned_quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PackRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[validate(range(min = 1))]
    pub bundle_size: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QcCheckRequest {
    #[validate(range(min = 1))]
    pub rejected_quantity: i32,
    #[validate(range(min = 0))]
    pub recycled_quantity: i32,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BundleListQuery {
    pub stage: Option<String>,
}

async fn create_line(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductionLineRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    payload.validate()?;
    let line = state
        .services
        .production
        .register_line(NewProductionLine {
            job_order_id: payload.job_order_id,
            product_id: payload.product_id,
            product_code: payload.product_code,
            bar_mark: payload.bar_mark,
            unit_weight_kg: payload.unit_weight_kg,
            planned_quantity: payload.planned_quantity,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(line))))
}

async fn get_line(
    State(state): State<AppState>,
    Path(line_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let line = state.services.production.line_snapshot(line_id).await?;
    Ok(Json(ApiResponse::success(line)))
}

async fn list_bundles(
    State(state): State<AppState>,
    Path(line_id): Path<Uuid>,
    Query(query): Query<BundleListQuery>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let stage = match query.stage.as_deref() {
        None => None,
        Some(raw) => Some(BundleStage::from_str(raw).ok_or_else(|| {
            ServiceError::ValidationError(format!("Unknown bundle stage {:?}", raw))
        })?),
    };
    let bundles = state.services.packing.list_bundles(line_id, stage).await?;
    Ok(Json(ApiResponse::success(bundles)))
}

async fn pack(
    State(state): State<AppState>,
    Path(line_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<PackRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    payload.validate()?;
    let bundles = state
        .services
        .packing
        .pack(line_id, payload.quantity, payload.bundle_size, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(bundles))))
}

async fn record_qc_check(
    State(state): State<AppState>,
    Path(line_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<QcCheckRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    payload.validate()?;
    let check = state
        .services
        .qc
        .record_rejection(
            line_id,
            payload.rejected_quantity,
            payload.recycled_quantity,
            payload.remarks,
            &user,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(check))))
}

async fn list_qc_checks(
    State(state): State<AppState>,
    Path(line_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let checks = state.services.qc.list_checks(line_id).await?;
    Ok(Json(ApiResponse::success(checks)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_line))
        .route("/:id", get(get_line))
        .route("/:id/bundles", get(list_bundles))
        .route("/:id/pack", post(pack))
        .route("/:id/qc-checks", post(record_qc_check).get(list_qc_checks))
}
