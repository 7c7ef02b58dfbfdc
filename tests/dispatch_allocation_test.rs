//! Integration tests for the FIFO dispatch allocator.

mod common;

use assert_matches::assert_matches;
use fabline_api::entities::packing_bundle::{self, BundleStage};
use fabline_api::errors::ServiceError;
use fabline_api::services::dispatch::DispatchRequestItem;
use sea_orm::EntityTrait;
use uuid::Uuid;

use common::{assert_conservation, seed_achieved, seed_line, setup, TestApp, TEST_USER};

fn item(bar_mark: Option<&str>, product_code: &str, quantity: i32) -> DispatchRequestItem {
    DispatchRequestItem {
        bar_mark: bar_mark.map(str::to_string),
        product_code: product_code.to_string(),
        quantity,
    }
}

async fn bundle(app: &TestApp, id: i64) -> packing_bundle::Model {
    packing_bundle::Entity::find_by_id(id)
        .one(&*app.db)
        .await
        .unwrap()
        .expect("bundle must exist")
}

#[tokio::test]
async fn fifo_consumes_oldest_bundles_first() {
    let app = setup().await;
    let line = seed_line(&app, 100, Some("BM-01"), "T16").await;
    seed_achieved(&app, line.id, 15).await;

    // Three bundles of 5, packed oldest to newest.
    let mut ids = Vec::new();
    for _ in 0..3 {
        let bundles = app
            .services
            .packing
            .pack(line.id, 5, 5, TEST_USER)
            .await
            .unwrap();
        ids.push(bundles[0].id);
    }

    let outcome = app
        .services
        .dispatch
        .dispatch(
            Uuid::new_v4(),
            vec![item(Some("BM-01"), "T16", 7)],
            TEST_USER,
        )
        .await
        .unwrap();

    assert_eq!(outcome.line_items.len(), 1);
    assert_eq!(outcome.line_items[0].quantity, 7);
    assert_eq!(outcome.line_items[0].bundle_id_list(), vec![ids[0], ids[1]]);
    assert!(outcome.skipped.is_empty());

    // Oldest bundle drained and flipped; second reduced in place; third
    // untouched.
    let first = bundle(&app, ids[0]).await;
    assert_eq!(first.quantity, 0);
    assert_eq!(first.stage_enum(), Some(BundleStage::Dispatched));

    let second = bundle(&app, ids[1]).await;
    assert_eq!(second.quantity, 3);
    assert_eq!(second.stage_enum(), Some(BundleStage::Packed));

    let third = bundle(&app, ids[2]).await;
    assert_eq!(third.quantity, 5);
    assert_eq!(third.stage_enum(), Some(BundleStage::Packed));

    let reloaded = assert_conservation(&app, line.id).await;
    assert_eq!(reloaded.dispatched_quantity, 7);
    assert_eq!(reloaded.packed_quantity, 15);
}

#[tokio::test]
async fn short_key_is_skipped_without_touching_stock() {
    let app = setup().await;
    let line_a = seed_line(&app, 100, Some("BM-A"), "T16").await;
    let line_b = seed_line(&app, 100, Some("BM-B"), "T16").await;
    seed_achieved(&app, line_a.id, 10).await;
    seed_achieved(&app, line_b.id, 5).await;
    app.services
        .packing
        .pack(line_a.id, 10, 10, TEST_USER)
        .await
        .unwrap();
    app.services
        .packing
        .pack(line_b.id, 5, 5, TEST_USER)
        .await
        .unwrap();

    let outcome = app
        .services
        .dispatch
        .dispatch(
            Uuid::new_v4(),
            vec![
                item(Some("BM-A"), "T16", 100),
                item(Some("BM-B"), "T16", 5),
            ],
            TEST_USER,
        )
        .await
        .unwrap();

    // Only B made it; A is reported as skipped with what was available.
    assert_eq!(outcome.line_items.len(), 1);
    assert_eq!(outcome.line_items[0].bar_mark.as_deref(), Some("BM-B"));
    assert_eq!(outcome.line_items[0].quantity, 5);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].bar_mark.as_deref(), Some("BM-A"));
    assert_eq!(outcome.skipped[0].requested, 100);
    assert_eq!(outcome.skipped[0].available, 10);

    // A's stock is untouched.
    let line_a_reloaded = assert_conservation(&app, line_a.id).await;
    assert_eq!(line_a_reloaded.dispatched_quantity, 0);
    assert_eq!(line_a_reloaded.packed_quantity, 10);

    let line_b_reloaded = assert_conservation(&app, line_b.id).await;
    assert_eq!(line_b_reloaded.dispatched_quantity, 5);
}

#[tokio::test]
async fn dispatch_with_no_satisfiable_key_fails() {
    let app = setup().await;
    let line = seed_line(&app, 100, Some("BM-A"), "T16").await;
    seed_achieved(&app, line.id, 10).await;
    app.services
        .packing
        .pack(line.id, 10, 10, TEST_USER)
        .await
        .unwrap();

    let work_order_id = Uuid::new_v4();
    let err = app
        .services
        .dispatch
        .dispatch(
            work_order_id,
            vec![item(Some("BM-A"), "T16", 100)],
            TEST_USER,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NothingToDispatch { .. });

    // Nothing was persisted or deducted.
    let reloaded = assert_conservation(&app, line.id).await;
    assert_eq!(reloaded.dispatched_quantity, 0);
    assert_eq!(reloaded.packed_quantity, 10);
}

#[tokio::test]
async fn blank_and_missing_marks_share_one_group() {
    let app = setup().await;
    // Two lines for the same product, one tagged with a blank mark and one
    // with none at all; their bundles must serve the same unmarked request.
    let line_null = seed_line(&app, 100, None, "PC-300").await;
    let line_blank = seed_line(&app, 100, Some("   "), "PC-300").await;
    seed_achieved(&app, line_null.id, 6).await;
    seed_achieved(&app, line_blank.id, 6).await;
    app.services
        .packing
        .pack(line_null.id, 6, 6, TEST_USER)
        .await
        .unwrap();
    app.services
        .packing
        .pack(line_blank.id, 6, 6, TEST_USER)
        .await
        .unwrap();

    let outcome = app
        .services
        .dispatch
        .dispatch(Uuid::new_v4(), vec![item(None, "PC-300", 9)], TEST_USER)
        .await
        .unwrap();

    assert_eq!(outcome.line_items.len(), 1);
    assert_eq!(outcome.line_items[0].quantity, 9);
    assert_eq!(outcome.line_items[0].bar_mark, None);

    // Oldest stock first: the null-marked line packed first, so it drains
    // fully and the blank-marked line covers the rest.
    let null_reloaded = assert_conservation(&app, line_null.id).await;
    assert_eq!(null_reloaded.dispatched_quantity, 6);
    let blank_reloaded = assert_conservation(&app, line_blank.id).await;
    assert_eq!(blank_reloaded.dispatched_quantity, 3);
}

#[tokio::test]
async fn duplicate_request_keys_are_merged() {
    let app = setup().await;
    let line = seed_line(&app, 100, Some("bm-01"), "T16").await;
    seed_achieved(&app, line.id, 10).await;
    app.services
        .packing
        .pack(line.id, 10, 5, TEST_USER)
        .await
        .unwrap();

    // Same key spelled two ways merges into one request for 8.
    let outcome = app
        .services
        .dispatch
        .dispatch(
            Uuid::new_v4(),
            vec![
                item(Some("BM-01"), "T16", 5),
                item(Some("bm-01 "), "t16", 3),
            ],
            TEST_USER,
        )
        .await
        .unwrap();

    assert_eq!(outcome.line_items.len(), 1);
    assert_eq!(outcome.line_items[0].quantity, 8);

    let reloaded = assert_conservation(&app, line.id).await;
    assert_eq!(reloaded.dispatched_quantity, 8);
}

#[tokio::test]
async fn full_dispatch_soft_closes_the_line() {
    let app = setup().await;
    let line = seed_line(&app, 10, Some("BM-09"), "T20").await;
    seed_achieved(&app, line.id, 10).await;
    app.services
        .packing
        .pack(line.id, 10, 5, TEST_USER)
        .await
        .unwrap();

    assert!(app
        .services
        .production
        .line_snapshot(line.id)
        .await
        .unwrap()
        .closed_at
        .is_none());

    let outcome = app
        .services
        .dispatch
        .dispatch(
            Uuid::new_v4(),
            vec![item(Some("BM-09"), "T20", 10)],
            TEST_USER,
        )
        .await
        .unwrap();

    let reloaded = assert_conservation(&app, line.id).await;
    assert_eq!(reloaded.dispatched_quantity, 10);
    assert!(reloaded.closed_at.is_some());

    // Delivery confirmation flips the drained bundles and stamps the record.
    let delivered = app
        .services
        .dispatch
        .mark_delivered(outcome.record.id, TEST_USER)
        .await
        .unwrap();
    assert!(delivered.delivered_at.is_some());

    for id in outcome.line_items[0].bundle_id_list() {
        let b = bundle(&app, id).await;
        assert_eq!(b.stage_enum(), Some(BundleStage::Delivered));
    }

    let err = app
        .services
        .dispatch
        .mark_delivered(outcome.record.id, TEST_USER)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn delivery_leaves_partially_consumed_bundles_in_stock() {
    let app = setup().await;
    let line = seed_line(&app, 100, Some("BM-05"), "T16").await;
    seed_achieved(&app, line.id, 10).await;
    let packed = app
        .services
        .packing
        .pack(line.id, 10, 10, TEST_USER)
        .await
        .unwrap();

    let outcome = app
        .services
        .dispatch
        .dispatch(
            Uuid::new_v4(),
            vec![item(Some("BM-05"), "T16", 4)],
            TEST_USER,
        )
        .await
        .unwrap();
    app.services
        .dispatch
        .mark_delivered(outcome.record.id, TEST_USER)
        .await
        .unwrap();

    // The bundle still holds 6 packed pieces; delivery must not touch it.
    let b = bundle(&app, packed[0].id).await;
    assert_eq!(b.quantity, 6);
    assert_eq!(b.stage_enum(), Some(BundleStage::Packed));
}

#[tokio::test]
async fn conservation_holds_across_the_full_flow() {
    let app = setup().await;
    let line = seed_line(&app, 60, Some("BM-02"), "T25").await;
    seed_achieved(&app, line.id, 40).await;
    assert_conservation(&app, line.id).await;

    app.services
        .qc
        .record_rejection(line.id, 4, 4, None, TEST_USER)
        .await
        .unwrap();
    assert_conservation(&app, line.id).await;

    app.services
        .packing
        .pack(line.id, 30, 8, TEST_USER)
        .await
        .unwrap();
    assert_conservation(&app, line.id).await;

    app.services
        .dispatch
        .dispatch(
            Uuid::new_v4(),
            vec![item(Some("BM-02"), "T25", 20)],
            TEST_USER,
        )
        .await
        .unwrap();
    let line_state = assert_conservation(&app, line.id).await;
    assert_eq!(line_state.achieved_quantity, 36);
    assert_eq!(line_state.packed_quantity, 30);
    assert_eq!(line_state.dispatched_quantity, 20);

    app.services
        .dispatch
        .dispatch(
            Uuid::new_v4(),
            vec![item(Some("BM-02"), "T25", 10)],
            TEST_USER,
        )
        .await
        .unwrap();
    let line_state = assert_conservation(&app, line_state.id).await;
    assert_eq!(line_state.dispatched_quantity, 30);
}

#[tokio::test]
async fn dispatch_validates_requests() {
    let app = setup().await;

    let err = app
        .services
        .dispatch
        .dispatch(Uuid::new_v4(), vec![], TEST_USER)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .dispatch
        .dispatch(
            Uuid::new_v4(),
            vec![item(Some("BM-01"), "T16", 0)],
            TEST_USER,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
