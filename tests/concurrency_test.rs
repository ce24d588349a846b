//! Concurrent requests against shared balances on a multi-connection SQLite
//! file. Writers must queue behind each other rather than fail.

mod common;

use assert_matches::assert_matches;
use inventory_ledger::{
    entities::{MovementType, PaymentMethod, ReturnReason},
    errors::ServiceError,
    services::{
        ledger::{AdjustStock, TransferStock},
        transactions::{ReturnRequest, SaleRequest, TransactionLine},
    },
};
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestApp;

fn single_line_sale(location_id: Uuid, product_id: Uuid, quantity: i32) -> SaleRequest {
    SaleRequest {
        location_id,
        items: vec![TransactionLine {
            product_id,
            quantity,
            unit_price: None,
            discount: None,
            tax_amount: None,
            notes: None,
        }],
        tax_amount: None,
        discount_amount: None,
        customer_name: None,
        customer_email: None,
        customer_phone: None,
        payment_method: Some(PaymentMethod::Cash),
        payment_reference: None,
        notes: None,
        created_by: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adjustments_are_all_applied() {
    let app = TestApp::file_backed().await;
    let product = app.seed_product("Widget", dec!(2.00)).await;
    let store = app.seed_location("Store").await;
    app.seed_stock(product.id, store.id, 100).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let ledger = app.state.ledger.clone();
        let (product_id, location_id) = (product.id, store.id);
        tasks.push(tokio::spawn(async move {
            ledger
                .adjust(AdjustStock {
                    product_id,
                    location_id,
                    quantity: 1,
                    movement_type: MovementType::AdjustmentIn,
                    reference: None,
                    notes: None,
                    created_by: None,
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("adjustment should queue, not fail");
    }

    let balance = app.state.ledger.get_balance(product.id, store.id).await.unwrap();
    assert_eq!(balance.quantity, 120);

    let movements = app
        .state
        .ledger
        .movements_for_product(product.id)
        .await
        .unwrap();
    assert_eq!(movements.len(), 21);
    let mut snapshots: Vec<i32> = movements.iter().map(|m| m.previous_quantity).collect();
    snapshots.sort_unstable();
    assert_eq!(snapshots, (0..1).chain(100..120).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sales_never_oversell() {
    let app = TestApp::file_backed_with_sequential_numbers().await;
    let product = app.seed_product("Widget", dec!(5.00)).await;
    let store = app.seed_location("Store").await;
    app.seed_stock(product.id, store.id, 10).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let processor = app.state.transactions.clone();
        let request = single_line_sale(store.id, product.id, 1);
        tasks.push(tokio::spawn(async move { processor.process_sale(request).await }));
    }

    let mut sold = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => sold += 1,
            Err(err) => assert_matches!(err, ServiceError::InsufficientStock { .. }),
        }
    }
    assert_eq!(sold, 10);

    let balance = app.state.ledger.get_balance(product.id, store.id).await.unwrap();
    assert_eq!(balance.quantity, 0);
    let (_, total) = app.state.transactions.list_transactions(1, 100).await.unwrap();
    assert_eq!(total, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposing_transfers_both_complete() {
    let app = TestApp::file_backed().await;
    let product = app.seed_product("Widget", dec!(1.00)).await;
    let north = app.seed_location("North").await;
    let south = app.seed_location("South").await;
    app.seed_stock(product.id, north.id, 50).await;
    app.seed_stock(product.id, south.id, 50).await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let ledger = app.state.ledger.clone();
        let (from, to) = if i % 2 == 0 {
            (north.id, south.id)
        } else {
            (south.id, north.id)
        };
        let product_id = product.id;
        tasks.push(tokio::spawn(async move {
            ledger
                .transfer(TransferStock {
                    product_id,
                    from_location_id: from,
                    to_location_id: to,
                    quantity: 3,
                    reference: None,
                    notes: None,
                    created_by: None,
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("transfer should queue, not fail");
    }

    let north_balance = app.state.ledger.get_balance(product.id, north.id).await.unwrap();
    let south_balance = app.state.ledger.get_balance(product.id, south.id).await.unwrap();
    assert_eq!(north_balance.quantity, 50);
    assert_eq!(south_balance.quantity, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_returns_cannot_exceed_quantity_sold() {
    let app = TestApp::file_backed_with_sequential_numbers().await;
    let product = app.seed_product("Widget", dec!(4.00)).await;
    let store = app.seed_location("Store").await;
    app.seed_stock(product.id, store.id, 10).await;

    let original = app
        .state
        .transactions
        .process_sale(single_line_sale(store.id, product.id, 3))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let processor = app.state.transactions.clone();
        let request = ReturnRequest {
            original_transaction_id: original.transaction.id,
            location_id: store.id,
            product_id: product.id,
            return_quantity: 3,
            reason: ReturnReason::NotSatisfied,
            refund_amount: None,
            refund_method: Some(PaymentMethod::Cash),
            refund_reference: None,
            notes: None,
            created_by: None,
        };
        tasks.push(tokio::spawn(async move { processor.process_return(request).await }));
    }

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(details) => {
                accepted += 1;
                assert_eq!(details.transaction.total_amount.round_dp(2), dec!(12.00));
            }
            Err(err) => assert_matches!(err, ServiceError::InvalidReturn(_)),
        }
    }
    assert_eq!(accepted, 1);

    let balance = app.state.ledger.get_balance(product.id, store.id).await.unwrap();
    assert_eq!(balance.quantity, 10);
}
