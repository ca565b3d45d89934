mod common;

use assert_matches::assert_matches;
use fulfillment_core::entities::sales_order::SalesOrderStatus;
use fulfillment_core::errors::ServiceError;

use common::TestApp;

#[tokio::test]
async fn canceling_a_reserved_order_frees_its_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("DESK-001").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let customer = app.seed_customer().await;
    // 10 reserved in total; 5 of them belong to this order's line.
    app.seed_inventory(product.id, warehouse.id, 30, 10).await;

    let order = app
        .seed_sales_order(customer.id, Some(warehouse.id), SalesOrderStatus::Reserved)
        .await;
    app.seed_order_line(order.id, product.id, 1, 5, 0).await;

    let result = app
        .cancellation_service()
        .cancel_order(order.id)
        .await
        .expect("cancellation");

    assert_eq!(result.previous_status, "RESERVED");
    assert_eq!(result.status, "CANCELED");
    assert_eq!(result.stock_freed, 5);
    assert_eq!(result.lines_canceled, 1);
    assert_eq!(result.lines[0].quantity, 5);

    app.assert_inventory(product.id, warehouse.id, 30, 5).await;
    let order = app.get_order(order.id).await;
    assert_eq!(order.status, SalesOrderStatus::Canceled);
    assert!(order.canceled_at.is_some());
    let lines = app.get_order_lines(order.id).await;
    assert_eq!(lines[0].backorder_qty, 0);
}

#[tokio::test]
async fn canceling_a_partially_reserved_order_relies_on_the_release_clamp() {
    let app = TestApp::new().await;
    let product = app.seed_product("DESK-002").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let customer = app.seed_customer().await;
    app.seed_inventory(product.id, warehouse.id, 5, 0).await;

    let order = app
        .seed_sales_order(customer.id, Some(warehouse.id), SalesOrderStatus::Created)
        .await;
    app.seed_order_line(order.id, product.id, 1, 10, 0).await;

    app.reservation_service()
        .reserve_order(order.id)
        .await
        .expect("partial reservation");
    app.assert_inventory(product.id, warehouse.id, 5, 5).await;

    // The line releases its full requested quantity (10), but only 5 were
    // ever reserved; the clamp keeps the row at zero rather than negative.
    let result = app
        .cancellation_service()
        .cancel_order(order.id)
        .await
        .expect("cancel partially reserved order");

    assert_eq!(result.stock_freed, 10);
    app.assert_inventory(product.id, warehouse.id, 5, 0).await;
    let lines = app.get_order_lines(order.id).await;
    assert_eq!(lines[0].backorder_qty, 0);
}

#[tokio::test]
async fn cancellation_is_terminal_for_shipped_and_canceled_orders() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let customer = app.seed_customer().await;

    for status in [
        SalesOrderStatus::Shipped,
        SalesOrderStatus::Delivered,
        SalesOrderStatus::Canceled,
    ] {
        let order = app
            .seed_sales_order(customer.id, Some(warehouse.id), status)
            .await;
        let err = app
            .cancellation_service()
            .cancel_order(order.id)
            .await
            .expect_err("cancellation from a terminal status");
        assert_matches!(err, ServiceError::Conflict(_));
    }
}

#[tokio::test]
async fn a_line_failure_aborts_the_whole_cancellation() {
    let app = TestApp::new().await;
    let stocked = app.seed_product("DESK-003").await;
    let never_stocked = app.seed_product("DESK-004").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let customer = app.seed_customer().await;
    app.seed_inventory(stocked.id, warehouse.id, 20, 8).await;

    let order = app
        .seed_sales_order(customer.id, Some(warehouse.id), SalesOrderStatus::Reserved)
        .await;
    app.seed_order_line(order.id, stocked.id, 1, 8, 0).await;
    app.seed_order_line(order.id, never_stocked.id, 2, 3, 0).await;

    let err = app
        .cancellation_service()
        .cancel_order(order.id)
        .await
        .expect_err("second line has no inventory row");
    assert_matches!(err, ServiceError::NotFound(_));

    // No partial cancellation: the first line's release rolled back and
    // the order status is untouched.
    app.assert_inventory(stocked.id, warehouse.id, 20, 8).await;
    let order = app.get_order(order.id).await;
    assert_eq!(order.status, SalesOrderStatus::Reserved);
    assert!(order.canceled_at.is_none());
}

#[tokio::test]
async fn canceling_a_created_order_releases_nothing_but_closes_it() {
    let app = TestApp::new().await;
    let product = app.seed_product("DESK-005").await;
    let warehouse = app.seed_warehouse("MAIN").await;
    let customer = app.seed_customer().await;
    app.seed_inventory(product.id, warehouse.id, 12, 0).await;

    let order = app
        .seed_sales_order(customer.id, Some(warehouse.id), SalesOrderStatus::Created)
        .await;
    app.seed_order_line(order.id, product.id, 1, 4, 0).await;

    let result = app
        .cancellation_service()
        .cancel_order(order.id)
        .await
        .expect("cancel before reservation");

    // Nothing was reserved, so the release clamps to a no-op.
    assert_eq!(result.stock_freed, 4);
    app.assert_inventory(product.id, warehouse.id, 12, 0).await;
    let order = app.get_order(order.id).await;
    assert_eq!(order.status, SalesOrderStatus::Canceled);
}
