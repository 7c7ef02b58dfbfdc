//! Smoke tests for the HTTP surface: routing, validation mapping, and the
//! error-to-status contract.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sea_orm::{ConnectOptions, Database};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use fabline_api::{config::AppConfig, db, events, AppState};

async fn test_app() -> axum::Router {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let pool = Database::connect(opt).await.expect("in-memory database");
    db::run_migrations(&pool).await.expect("migrations");

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(events::process_events(rx));

    let cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        0,
        "test".to_string(),
    );
    let state = AppState::new(Arc::new(pool), cfg, events::EventSender::new(tx));
    fabline_api::app(state)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-id", "qa")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_responds() {
    let app = test_app().await;
    let res = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_line_and_read_snapshot() {
    let app = test_app().await;

    let res = app
        .clone()
        .oneshot(post(
            "/api/v1/production-lines",
            json!({
                "job_order_id": Uuid::new_v4(),
                "product_id": Uuid::new_v4(),
                "product_code": "T16",
                "bar_mark": "BM-01",
                "planned_quantity": 50
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    let line_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["planned_quantity"], 50);
    assert_eq!(body["data"]["dispatched_quantity"], 0);

    let res = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/production-lines/{}", line_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["data"]["product_code"], "T16");
}

#[tokio::test]
async fn invalid_payload_maps_to_bad_request() {
    let app = test_app().await;
    let res = app
        .oneshot(post(
            "/api/v1/production-lines",
            json!({
                "job_order_id": Uuid::new_v4(),
                "product_id": Uuid::new_v4(),
                "product_code": "T16",
                "planned_quantity": -5
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = body_json(res).await;
    assert_eq!(body["error"], "Bad Request");
}

#[tokio::test]
async fn unknown_line_maps_to_not_found() {
    let app = test_app().await;
    let res = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/production-lines/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_dispatch_maps_to_unprocessable() {
    let app = test_app().await;
    // No packed stock anywhere: the only requested key is skipped and the
    // allocator reports there was nothing to dispatch.
    let res = app
        .oneshot(post(
            "/api/v1/dispatches",
            json!({
                "work_order_id": Uuid::new_v4(),
                "items": [{"bar_mark": "BM-01", "product_code": "T16", "quantity": 5}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(res).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Nothing to dispatch"));
}
