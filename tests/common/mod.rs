//! Test harness: real services over an in-memory SQLite database.
#![allow(dead_code)]

use std::sync::Arc;

use sea_orm::{ConnectOptions, Database};
use tokio::sync::mpsc;
use uuid::Uuid;

use fabline_api::{
    config::AppConfig,
    db,
    entities::production_line,
    events::{self, EventSender},
    handlers::AppServices,
    services::production::NewProductionLine,
};

pub const TEST_USER: &str = "tester";

pub struct TestApp {
    pub db: Arc<db::DbPool>,
    pub services: AppServices,
}

/// Builds a fresh application backed by an in-memory SQLite database. One
/// pooled connection keeps every query on the same memory database.
pub async fn setup() -> TestApp {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);

    let pool = Database::connect(opt)
        .await
        .expect("failed to open in-memory database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    let db = Arc::new(pool);
    let (tx, rx) = mpsc::channel(256);
    let sender = EventSender::new(tx);
    tokio::spawn(events::process_events(rx));

    let cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        0,
        "test".to_string(),
    );
    let services = AppServices::new(db.clone(), sender, &cfg);

    TestApp { db, services }
}

/// Registers a production line with zeroed counters.
pub async fn seed_line(
    app: &TestApp,
    planned: i32,
    bar_mark: Option<&str>,
    product_code: &str,
) -> production_line::Model {
    app.services
        .production
        .register_line(NewProductionLine {
            job_order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_code: product_code.to_string(),
            bar_mark: bar_mark.map(str::to_string),
            unit_weight_kg: None,
            planned_quantity: planned,
        })
        .await
        .expect("failed to register line")
}

/// Runs a full production session against the line, achieving `quantity`.
pub async fn seed_achieved(app: &TestApp, line_id: Uuid, quantity: i32) {
    let record = app
        .services
        .production
        .create_record(line_id, TEST_USER)
        .await
        .expect("failed to open record");
    app.services
        .production
        .start(record.id, TEST_USER)
        .await
        .expect("failed to start record");
    app.services
        .production
        .update_quantity(record.id, quantity, TEST_USER)
        .await
        .expect("failed to update quantity");
    app.services
        .production
        .stop(record.id, TEST_USER)
        .await
        .expect("failed to stop record");
    app.services
        .production
        .review(record.id, true, None, TEST_USER)
        .await
        .expect("failed to approve record");
}

/// Reloads the line and asserts the conservation chain holds.
pub async fn assert_conservation(app: &TestApp, line_id: Uuid) -> production_line::Model {
    let line = app
        .services
        .production
        .line_snapshot(line_id)
        .await
        .expect("line must exist");
    assert!(
        line.dispatched_quantity <= line.packed_quantity,
        "dispatched {} > packed {}",
        line.dispatched_quantity,
        line.packed_quantity
    );
    assert!(
        line.packed_quantity <= line.achieved_quantity,
        "packed {} > achieved {}",
        line.packed_quantity,
        line.achieved_quantity
    );
    assert!(line.dispatched_quantity >= 0);
    line
}
