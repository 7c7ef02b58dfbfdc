pub mod dispatches;
pub mod production_lines;
pub mod production_records;

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    dispatch::DispatchService, packing::PackingService, production::ProductionService,
    qc::QcService,
};
use crate::AppState;

/// Container for the business services the handlers delegate to.
#[derive(Clone)]
pub struct AppServices {
    pub production: Arc<ProductionService>,
    pub qc: Arc<QcService>,
    pub packing: Arc<PackingService>,
    pub dispatch: Arc<DispatchService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        let retries = config.conflict_retry_attempts;
        Self {
            production: Arc::new(ProductionService::new(
                db.clone(),
                event_sender.clone(),
                retries,
            )),
            qc: Arc::new(QcService::new(db.clone(), event_sender.clone(), retries)),
            packing: Arc::new(PackingService::new(
                db.clone(),
                event_sender.clone(),
                retries,
            )),
            dispatch: Arc::new(DispatchService::new(db, event_sender, retries)),
        }
    }
}

/// The authenticated principal, injected by the upstream gateway. Auth
/// itself is out of scope here; the header is trusted.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("system")
            .to_string();
        Ok(CurrentUser(user))
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME") }))
}

/// Assembles the full API router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/production-lines", production_lines::routes())
        .nest("/api/v1/production-records", production_records::routes())
        .nest("/api/v1/dispatches", dispatches::routes())
}
