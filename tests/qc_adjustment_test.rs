//! Integration tests for QC rejection capture.

mod common;

use assert_matches::assert_matches;
use fabline_api::entities::LogAction;
use fabline_api::errors::ServiceError;
use sea_orm::EntityTrait;

use common::{assert_conservation, seed_achieved, seed_line, setup, TEST_USER};

#[tokio::test]
async fn rejection_moves_achieved_to_rejected() {
    let app = setup().await;
    let line = seed_line(&app, 50, Some("BM-07"), "T16").await;
    seed_achieved(&app, line.id, 20).await;

    let check = app
        .services
        .qc
        .record_rejection(line.id, 5, 2, Some("bent hooks".to_string()), TEST_USER)
        .await
        .unwrap();
    assert_eq!(check.rejected_delta, 5);
    assert_eq!(check.recycled_delta, 2);
    assert_eq!(check.recorded_by, TEST_USER);

    let reloaded = assert_conservation(&app, line.id).await;
    assert_eq!(reloaded.achieved_quantity, 15);
    assert_eq!(reloaded.rejected_quantity, 5);
    assert_eq!(reloaded.recycled_quantity, 2);

    // The inspection is logged against the line's session.
    let record_id = check.record_id.expect("check links to the session");
    let logs = app.services.production.list_logs(record_id).await.unwrap();
    let qc_log = logs
        .iter()
        .find(|l| l.action == LogAction::QcCheck.as_str())
        .expect("qc_check log entry");
    assert_eq!(qc_log.quantity_delta, Some(-5));
}

#[tokio::test]
async fn over_rejection_fails_and_leaves_counters_unchanged() {
    let app = setup().await;
    let line = seed_line(&app, 50, None, "PC-300").await;
    seed_achieved(&app, line.id, 10).await;

    let err = app
        .services
        .qc
        .record_rejection(line.id, 11, 0, None, TEST_USER)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidQuantity {
            rejected_delta: 11,
            achieved: 10,
            ..
        }
    );

    let reloaded = app.services.production.line_snapshot(line.id).await.unwrap();
    assert_eq!(reloaded.achieved_quantity, 10);
    assert_eq!(reloaded.rejected_quantity, 0);

    let checks = app.services.qc.list_checks(line.id).await.unwrap();
    assert!(checks.is_empty());
}

#[tokio::test]
async fn repeated_inspections_accumulate() {
    let app = setup().await;
    let line = seed_line(&app, 50, None, "T20").await;
    seed_achieved(&app, line.id, 20).await;
    let qc = &app.services.qc;

    qc.record_rejection(line.id, 3, 1, None, TEST_USER)
        .await
        .unwrap();
    qc.record_rejection(line.id, 3, 1, None, TEST_USER)
        .await
        .unwrap();

    let reloaded = assert_conservation(&app, line.id).await;
    assert_eq!(reloaded.achieved_quantity, 14);
    assert_eq!(reloaded.rejected_quantity, 6);
    assert_eq!(reloaded.recycled_quantity, 2);
    assert_eq!(qc.list_checks(line.id).await.unwrap().len(), 2);

    // Rejections may keep coming until everything achieved is rejected, but
    // never past it.
    qc.record_rejection(line.id, 14, 0, None, TEST_USER)
        .await
        .unwrap();
    let err = qc
        .record_rejection(line.id, 1, 0, None, TEST_USER)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity { achieved: 0, .. });
}

#[tokio::test]
async fn rejection_validates_inputs() {
    let app = setup().await;
    let line = seed_line(&app, 50, None, "T20").await;
    seed_achieved(&app, line.id, 20).await;
    let qc = &app.services.qc;

    let err = qc
        .record_rejection(line.id, 0, 0, None, TEST_USER)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    // Recycled is a subset of the rejected material.
    let err = qc
        .record_rejection(line.id, 2, 3, None, TEST_USER)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn rejection_respects_packed_quantity() {
    // Pieces already packed are out of QC's reach: rejecting them would
    // break packed <= achieved.
    let app = setup().await;
    let line = seed_line(&app, 50, None, "T16").await;
    seed_achieved(&app, line.id, 20).await;
    app.services
        .packing
        .pack(line.id, 15, 5, TEST_USER)
        .await
        .unwrap();

    let err = app
        .services
        .qc
        .record_rejection(line.id, 10, 0, None, TEST_USER)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvariantViolation { .. });

    // 5 loose pieces remain rejectable.
    app.services
        .qc
        .record_rejection(line.id, 5, 0, None, TEST_USER)
        .await
        .unwrap();
    let reloaded = assert_conservation(&app, line.id).await;
    assert_eq!(reloaded.achieved_quantity, 15);
    assert_eq!(reloaded.packed_quantity, 15);

    // The audit row count matches the successful inspections only.
    let all = fabline_api::entities::qc_check::Entity::find()
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}
