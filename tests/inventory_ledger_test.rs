mod common;

use assert_matches::assert_matches;
use fulfillment_core::errors::ServiceError;
use fulfillment_core::services::inventory::AdjustStockCommand;
use uuid::Uuid;

use common::TestApp;

#[tokio::test]
async fn inbound_then_outbound_round_trips_to_zero() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-001").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let service = app.inventory_service();

    // No inventory row exists yet; the first inbound creates it.
    let inbound = service
        .inbound(product.id, warehouse.id, 50, Some("ASN-1".to_string()))
        .await
        .expect("inbound should create the row and book stock");
    assert_eq!(inbound.new_on_hand, 50);
    assert_eq!(inbound.new_reserved, 0);

    let outbound = service
        .outbound(product.id, warehouse.id, 50, Some("SO-1".to_string()))
        .await
        .expect("outbound of the full quantity");
    assert_eq!(outbound.new_on_hand, 0);

    app.assert_inventory(product.id, warehouse.id, 0, 0).await;

    let movements = app.get_movements(product.id, warehouse.id).await;
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[0].movement_type.to_string(), "INBOUND");
    assert_eq!(movements[0].quantity, 50);
    assert_eq!(movements[0].reference_doc.as_deref(), Some("ASN-1"));
    assert_eq!(movements[1].movement_type.to_string(), "OUTBOUND");
    assert_eq!(movements[1].quantity, 50);
}

#[tokio::test]
async fn inbound_requires_positive_quantity() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-002").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let service = app.inventory_service();

    let err = service
        .inbound(product.id, warehouse.id, 0, None)
        .await
        .expect_err("zero quantity must be rejected");
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = service
        .outbound(product.id, warehouse.id, -5, None)
        .await
        .expect_err("negative quantity must be rejected");
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn ledger_operations_require_existing_product_and_warehouse() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-003").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let service = app.inventory_service();

    let err = service
        .inbound(Uuid::new_v4(), warehouse.id, 10, None)
        .await
        .expect_err("unknown product");
    assert_matches!(err, ServiceError::NotFound(_));

    let err = service
        .inbound(product.id, Uuid::new_v4(), 10, None)
        .await
        .expect_err("unknown warehouse");
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn outbound_rejects_more_than_available() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-004").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    app.seed_inventory(product.id, warehouse.id, 20, 15).await;
    let service = app.inventory_service();

    // Only 5 of the 20 on hand are unreserved.
    let err = service
        .outbound(product.id, warehouse.id, 6, None)
        .await
        .expect_err("outbound beyond available stock");
    assert_matches!(err, ServiceError::InsufficientStock(_));

    service
        .outbound(product.id, warehouse.id, 5, None)
        .await
        .expect("outbound within available stock");
    app.assert_inventory(product.id, warehouse.id, 15, 15).await;
}

#[tokio::test]
async fn negative_adjustment_cannot_eat_reserved_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-005").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    app.seed_inventory(product.id, warehouse.id, 100, 20).await;
    let service = app.inventory_service();

    let err = service
        .adjust(AdjustStockCommand {
            product_id: product.id,
            warehouse_id: warehouse.id,
            delta_qty: -81,
            reason: "cycle count".to_string(),
        })
        .await
        .expect_err("adjustment below the reserved floor");
    assert_matches!(err, ServiceError::InsufficientStock(_));
    app.assert_inventory(product.id, warehouse.id, 100, 20).await;

    let record = service
        .adjust(AdjustStockCommand {
            product_id: product.id,
            warehouse_id: warehouse.id,
            delta_qty: -80,
            reason: "cycle count".to_string(),
        })
        .await
        .expect("adjustment down to the reserved floor");
    assert_eq!(record.new_on_hand, 20);
    app.assert_inventory(product.id, warehouse.id, 20, 20).await;

    let movements = app.get_movements(product.id, warehouse.id).await;
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type.to_string(), "ADJUSTMENT");
    assert_eq!(movements[0].quantity, -80);
    assert_eq!(movements[0].reference_doc.as_deref(), Some("cycle count"));
}

#[tokio::test]
async fn adjustment_requires_a_reason() {
    let app = TestApp::new().await;
    let service = app.inventory_service();

    let err = service
        .adjust(AdjustStockCommand {
            product_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            delta_qty: 5,
            reason: String::new(),
        })
        .await
        .expect_err("empty reason must be rejected");
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn reserve_grants_at_most_available_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-006").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    app.seed_inventory(product.id, warehouse.id, 10, 4).await;
    let service = app.inventory_service();

    // 6 available; asking for 9 grants only 6 and never errors.
    let reserved = service
        .reserve(product.id, warehouse.id, 9)
        .await
        .expect("partial grant");
    assert_eq!(reserved, 6);
    app.assert_inventory(product.id, warehouse.id, 10, 10).await;

    // Nothing left to reserve.
    let reserved = service
        .reserve(product.id, warehouse.id, 1)
        .await
        .expect("zero grant");
    assert_eq!(reserved, 0);
    app.assert_inventory(product.id, warehouse.id, 10, 10).await;
}

#[tokio::test]
async fn reserve_missing_row_is_not_found() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-007").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let service = app.inventory_service();

    let err = service
        .reserve(product.id, warehouse.id, 1)
        .await
        .expect_err("no inventory row for the pair");
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn release_clamps_at_zero() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-008").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    app.seed_inventory(product.id, warehouse.id, 30, 10).await;
    let service = app.inventory_service();

    // Over-release from stale data is tolerated, never negative.
    service
        .release(product.id, warehouse.id, 25)
        .await
        .expect("clamped release");
    app.assert_inventory(product.id, warehouse.id, 30, 0).await;

    // Releasing with nothing reserved is a no-op.
    service
        .release(product.id, warehouse.id, 5)
        .await
        .expect("no-op release");
    app.assert_inventory(product.id, warehouse.id, 30, 0).await;
}

#[tokio::test]
async fn quantity_writes_bump_the_row_version() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-009").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    app.seed_inventory(product.id, warehouse.id, 10, 0).await;
    let service = app.inventory_service();

    let before = app.get_inventory(product.id, warehouse.id).await;
    service
        .reserve(product.id, warehouse.id, 3)
        .await
        .expect("reserve");
    let after = app.get_inventory(product.id, warehouse.id).await;
    assert_eq!(after.version, before.version + 1);

    service
        .release(product.id, warehouse.id, 3)
        .await
        .expect("release");
    let final_row = app.get_inventory(product.id, warehouse.id).await;
    assert_eq!(final_row.version, before.version + 2);
}

#[tokio::test]
async fn movement_history_pages_newest_first() {
    let app = TestApp::new().await;
    let product = app.seed_product("WIDGET-010").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let service = app.inventory_service();

    for _ in 0..3 {
        service
            .inbound(product.id, warehouse.id, 10, None)
            .await
            .expect("inbound");
    }

    let (page, total) = service
        .list_movements(product.id, warehouse.id, 1, 2)
        .await
        .expect("list movements");
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);

    let err = service
        .list_movements(product.id, warehouse.id, 0, 2)
        .await
        .expect_err("page zero is invalid");
    assert_matches!(err, ServiceError::ValidationError(_));
}
