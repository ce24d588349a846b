mod common;

use assert_matches::assert_matches;
use inventory_ledger::{
    entities::MovementType,
    errors::ServiceError,
    events::Event,
    services::ledger::{AdjustStock, TransferStock},
};
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestApp;

fn adjustment(product_id: Uuid, location_id: Uuid, quantity: i32, kind: MovementType) -> AdjustStock {
    AdjustStock {
        product_id,
        location_id,
        quantity,
        movement_type: kind,
        reference: Some("cycle count".to_string()),
        notes: None,
        created_by: Some("clerk".to_string()),
    }
}

fn transfer(product_id: Uuid, from: Uuid, to: Uuid, quantity: i32) -> TransferStock {
    TransferStock {
        product_id,
        from_location_id: from,
        to_location_id: to,
        quantity,
        reference: None,
        notes: None,
        created_by: None,
    }
}

#[tokio::test]
async fn adjustment_below_zero_is_rejected_and_valid_one_goes_low() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(15.99)).await;
    let store = app.seed_location("Main Street").await;
    app.seed_stock(product.id, store.id, 50).await;

    let err = app
        .state
        .ledger
        .adjust(adjustment(product.id, store.id, -60, MovementType::AdjustmentOut))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock {
            available: 50,
            requested: 60,
            ..
        }
    );
    let unchanged = app.state.ledger.get_balance(product.id, store.id).await.unwrap();
    assert_eq!(unchanged.quantity, 50);

    let balance = app
        .state
        .ledger
        .adjust(adjustment(product.id, store.id, -45, MovementType::AdjustmentOut))
        .await
        .unwrap();
    assert_eq!(balance.quantity, 5);
    assert!(balance.is_low_stock());

    let movements = app
        .state
        .ledger
        .movements_for_product(product.id)
        .await
        .unwrap();
    assert_eq!(movements.len(), 2, "initial stock plus one adjustment");
    let out = movements
        .iter()
        .find(|m| m.movement_type == MovementType::AdjustmentOut)
        .expect("adjustment movement");
    assert_eq!(out.quantity, 45);
    assert_eq!(out.previous_quantity, 50);
    assert_eq!(out.new_quantity, 5);
    assert_eq!(out.reference.as_deref(), Some("cycle count"));
    assert_eq!(out.created_by.as_deref(), Some("clerk"));
}

#[tokio::test]
async fn adjustment_creates_missing_balance_with_product_threshold() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(2.50)).await;
    let store = app.seed_location("Main Street").await;

    let balance = app
        .state
        .ledger
        .adjust(adjustment(product.id, store.id, 12, MovementType::AdjustmentIn))
        .await
        .unwrap();
    assert_eq!(balance.quantity, 12);
    assert_eq!(balance.reserved_quantity, 0);
    assert_eq!(balance.low_stock_threshold, product.low_stock_threshold);
}

#[tokio::test]
async fn removing_stock_that_was_never_held_fails() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(2.50)).await;
    let store = app.seed_location("Main Street").await;

    let err = app
        .state
        .ledger
        .adjust(adjustment(product.id, store.id, -1, MovementType::Damage))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { available: 0, .. });
    assert_matches!(
        app.state.ledger.get_balance(product.id, store.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn adjustment_rejects_zero_and_mismatched_direction() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(2.50)).await;
    let store = app.seed_location("Main Street").await;

    assert_matches!(
        app.state
            .ledger
            .adjust(adjustment(product.id, store.id, 0, MovementType::AdjustmentIn))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.state
            .ledger
            .adjust(adjustment(product.id, store.id, 5, MovementType::Sale))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.state
            .ledger
            .adjust(adjustment(product.id, store.id, -5, MovementType::Return))
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn adjustment_requires_known_product_and_active_location() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(2.50)).await;
    let store = app.seed_location("Main Street").await;

    assert_matches!(
        app.state
            .ledger
            .adjust(adjustment(Uuid::new_v4(), store.id, 5, MovementType::AdjustmentIn))
            .await,
        Err(ServiceError::NotFound(_))
    );

    app.state.locations.deactivate_location(store.id).await.unwrap();
    assert_matches!(
        app.state
            .ledger
            .adjust(adjustment(product.id, store.id, 5, MovementType::AdjustmentIn))
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn transfer_moves_stock_and_links_both_movements() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(15.99)).await;
    let l1 = app.seed_location("Warehouse").await;
    let l2 = app.seed_location("Storefront").await;
    app.seed_stock(product.id, l1.id, 50).await;

    let result = app
        .state
        .ledger
        .transfer(transfer(product.id, l1.id, l2.id, 20))
        .await
        .unwrap();
    assert_eq!(result.from.quantity, 30);
    assert_eq!(result.to.quantity, 20);

    let movements = app
        .state
        .ledger
        .movements_for_product(product.id)
        .await
        .unwrap();
    let out = movements
        .iter()
        .find(|m| m.movement_type == MovementType::TransferOut)
        .expect("transfer out");
    let into = movements
        .iter()
        .find(|m| m.movement_type == MovementType::TransferIn)
        .expect("transfer in");

    assert_eq!(out.location_id, l1.id);
    assert_eq!(into.location_id, l2.id);
    for m in [out, into] {
        assert_eq!(m.quantity, 20);
        assert_eq!(m.from_location_id, Some(l1.id));
        assert_eq!(m.to_location_id, Some(l2.id));
    }
    assert_eq!((out.previous_quantity, out.new_quantity), (50, 30));
    assert_eq!((into.previous_quantity, into.new_quantity), (0, 20));
    // Net change across the pair is zero.
    assert_eq!(out.net_change() + into.net_change(), 0);
}

#[tokio::test]
async fn failed_transfer_leaves_no_trace() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(15.99)).await;
    let l1 = app.seed_location("Warehouse").await;
    let l2 = app.seed_location("Storefront").await;
    app.seed_stock(product.id, l1.id, 5).await;
    app.seed_stock(product.id, l2.id, 1).await;

    let err = app
        .state
        .ledger
        .transfer(transfer(product.id, l1.id, l2.id, 6))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock {
            available: 5,
            requested: 6,
            ..
        }
    );

    let (_, total) = app.state.ledger.movements(1, 50).await.unwrap();
    assert_eq!(total, 2, "only the two seeding movements exist");
    assert_eq!(
        app.state.ledger.get_balance(product.id, l1.id).await.unwrap().quantity,
        5
    );
    assert_eq!(
        app.state.ledger.get_balance(product.id, l2.id).await.unwrap().quantity,
        1
    );
}

#[tokio::test]
async fn transfer_edge_cases() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(15.99)).await;
    let l1 = app.seed_location("Warehouse").await;
    let l2 = app.seed_location("Storefront").await;

    assert_matches!(
        app.state
            .ledger
            .transfer(transfer(product.id, l1.id, l1.id, 1))
            .await,
        Err(ServiceError::InvalidTransfer(_))
    );
    assert_matches!(
        app.state
            .ledger
            .transfer(transfer(product.id, l1.id, l2.id, 1))
            .await,
        Err(ServiceError::NotFound(_)),
        "no source balance"
    );
    assert_matches!(
        app.state
            .ledger
            .transfer(transfer(product.id, l1.id, l2.id, 0))
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn get_balance_is_stable_between_mutations() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(1.00)).await;
    let store = app.seed_location("Main Street").await;
    app.seed_stock(product.id, store.id, 8).await;

    let first = app.state.ledger.get_balance(product.id, store.id).await.unwrap();
    let second = app.state.ledger.get_balance(product.id, store.id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn adjustments_publish_stock_and_low_stock_events() {
    let mut app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(1.00)).await;
    let store = app.seed_location("Main Street").await;
    app.seed_stock(product.id, store.id, 12).await;
    app.drain_events();

    app.state
        .ledger
        .adjust(adjustment(product.id, store.id, -3, MovementType::Damage))
        .await
        .unwrap();

    let events = app.drain_events();
    assert_eq!(
        events,
        vec![
            Event::StockAdjusted {
                product_id: product.id,
                location_id: store.id,
                movement_type: MovementType::Damage,
                previous_quantity: 12,
                new_quantity: 9,
            },
            Event::LowStockDetected {
                product_id: product.id,
                location_id: store.id,
                available_quantity: 9,
                threshold: 10,
            },
        ]
    );
}

#[tokio::test]
async fn low_stock_report_and_overview() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(2.00)).await;
    let gadget = app.seed_product("Gadget", dec!(5.00)).await;
    let store = app.seed_location("Main Street").await;
    let depot = app.seed_location("Depot").await;
    app.seed_stock(widget.id, store.id, 4).await;
    app.seed_stock(gadget.id, store.id, 40).await;
    app.seed_stock(gadget.id, depot.id, 10).await;

    let low = app.state.ledger.low_stock(None).await.unwrap();
    assert_eq!(low.len(), 2);
    let widget_low = low.iter().find(|i| i.product_id == widget.id).unwrap();
    assert_eq!(widget_low.current_stock, 4);
    assert_eq!(widget_low.suggested_reorder, 20);
    assert_eq!(widget_low.location_name, "Main Street");

    let at_depot = app.state.ledger.low_stock(Some(depot.id)).await.unwrap();
    assert_eq!(at_depot.len(), 1);
    assert_eq!(at_depot[0].product_id, gadget.id);

    let overview = app.state.ledger.overview().await.unwrap();
    assert_eq!(overview.total_products, 2);
    assert_eq!(overview.total_locations, 2);
    assert_eq!(overview.total_stock_units, 54);
    assert_eq!(overview.total_inventory_value.round_dp(2), dec!(258.00));
    assert_eq!(overview.low_stock_count, 2);
    assert_eq!(overview.location_summaries.len(), 2);
    let main = overview
        .location_summaries
        .iter()
        .find(|s| s.location_id == store.id)
        .unwrap();
    assert_eq!(main.total_items, 2);
    assert_eq!(main.low_stock_items, 1);
    assert_eq!(main.inventory_value.round_dp(2), dec!(208.00));
}

#[tokio::test]
async fn balances_by_product_and_location() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(2.00)).await;
    let gadget = app.seed_product("Gadget", dec!(5.00)).await;
    let store = app.seed_location("Main Street").await;
    let depot = app.seed_location("Depot").await;
    app.seed_stock(widget.id, store.id, 4).await;
    app.seed_stock(widget.id, depot.id, 6).await;
    app.seed_stock(gadget.id, depot.id, 7).await;

    let by_product = app.state.ledger.balances_for_product(widget.id).await.unwrap();
    assert_eq!(by_product.len(), 2);
    assert_eq!(by_product.iter().map(|b| b.quantity).sum::<i32>(), 10);

    let by_location = app.state.ledger.balances_for_location(depot.id).await.unwrap();
    assert_eq!(by_location.len(), 2);

    assert_matches!(
        app.state.ledger.balances_for_product(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn movement_log_pages() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(2.00)).await;
    let store = app.seed_location("Main Street").await;
    for _ in 0..5 {
        app.seed_stock(product.id, store.id, 1).await;
    }

    let (page_one, total) = app.state.ledger.movements(1, 2).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(page_one.len(), 2);
    let (page_three, _) = app.state.ledger.movements(3, 2).await.unwrap();
    assert_eq!(page_three.len(), 1);
}
