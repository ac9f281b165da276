mod common;

use agrimart_api::{
    entities::{OrderStatus, PaymentStatus, UserRole},
    errors::ServiceError,
    services::commerce::order_service::{ManualOrderInput, OrderLineInput},
};
use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn manual(email: &str, items: Vec<OrderLineInput>) -> ManualOrderInput {
    ManualOrderInput {
        user_email: email.to_string(),
        items,
        coupon_code: None,
        payment_mode: None,
    }
}

#[tokio::test]
async fn manual_cash_order_is_confirmed_and_reserves_stock() {
    let app = TestApp::new().await;
    let farmer = app.seed_user("farmer@example.com", UserRole::Customer).await;
    let rice = app.seed_product("Rice 5kg", dec!(80.00), 10).await;
    let sugar = app.seed_product("Sugar 2kg", dec!(40.00), 10).await;
    app.seed_coupon("TEN", dec!(10.00), true).await;

    let mut input = manual(
        &farmer.email,
        vec![
            OrderLineInput { product_id: rice.id, quantity: 2 },
            OrderLineInput { product_id: sugar.id, quantity: 1 },
        ],
    );
    input.coupon_code = Some("TEN".into());

    let detail = app
        .state
        .services
        .orders
        .create_manual_order(input)
        .await
        .unwrap();

    assert_eq!(detail.order.user_id, farmer.id);
    assert_eq!(detail.order.total_amount, dec!(190.00));
    assert_eq!(detail.order.status, OrderStatus::Confirmed);
    assert_eq!(detail.order.payment_status, PaymentStatus::Completed);
    assert_eq!(detail.coupon_code.as_deref(), Some("TEN"));
    assert_eq!(detail.items.len(), 2);
    assert!(detail.payment.is_some());
    assert_eq!(app.stock_of(rice.id).await, 8);
    assert_eq!(app.stock_of(sugar.id).await, 9);
}

#[tokio::test]
async fn manual_order_with_deferred_payment_is_pending() {
    let app = TestApp::new().await;
    let farmer = app.seed_user("farmer@example.com", UserRole::Customer).await;
    let rice = app.seed_product("Rice 5kg", dec!(80.00), 10).await;

    let mut input = manual(
        &farmer.email,
        vec![OrderLineInput { product_id: rice.id, quantity: 1 }],
    );
    input.payment_mode = Some("Bank transfer".into());

    let detail = app
        .state
        .services
        .orders
        .create_manual_order(input)
        .await
        .unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert_eq!(detail.order.payment_status, PaymentStatus::Pending);
    assert_eq!(detail.order.payment_mode, "Bank transfer");
    assert!(detail.payment.is_none());
}

#[tokio::test]
async fn manual_order_requires_an_active_known_user() {
    let app = TestApp::new().await;
    let dormant = app.seed_inactive_user("dormant@example.com").await;
    let rice = app.seed_product("Rice 5kg", dec!(80.00), 10).await;
    let orders = &app.state.services.orders;
    let line = || vec![OrderLineInput { product_id: rice.id, quantity: 1 }];

    assert_matches!(
        orders
            .create_manual_order(manual("ghost@example.com", line()))
            .await,
        Err(ServiceError::UserNotFound(email)) if email == "ghost@example.com"
    );
    assert_matches!(
        orders.create_manual_order(manual(&dormant.email, line())).await,
        Err(ServiceError::ValidationError(msg)) if msg == "User account is inactive"
    );
    assert_eq!(app.stock_of(rice.id).await, 10);
}

#[tokio::test]
async fn manual_order_validates_lines() {
    let app = TestApp::new().await;
    let farmer = app.seed_user("farmer@example.com", UserRole::Customer).await;
    let rice = app.seed_product("Rice 5kg", dec!(80.00), 2).await;
    let showcase = app.seed_display_only_product("Tractor", dec!(9000.00)).await;
    let orders = &app.state.services.orders;

    assert_matches!(
        orders.create_manual_order(manual(&farmer.email, vec![])).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        orders
            .create_manual_order(manual(
                &farmer.email,
                vec![OrderLineInput { product_id: rice.id, quantity: 0 }],
            ))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        orders
            .create_manual_order(manual(
                &farmer.email,
                vec![OrderLineInput { product_id: rice.id, quantity: 3 }],
            ))
            .await,
        Err(ServiceError::InsufficientStock { available: 2, .. })
    );
    assert_matches!(
        orders
            .create_manual_order(manual(
                &farmer.email,
                vec![OrderLineInput { product_id: showcase.id, quantity: 1 }],
            ))
            .await,
        Err(ServiceError::ProductNotPurchasable(_))
    );
    assert_matches!(
        orders
            .create_manual_order(manual(
                &farmer.email,
                vec![OrderLineInput { product_id: Uuid::new_v4(), quantity: 1 }],
            ))
            .await,
        Err(ServiceError::NotFound(_))
    );

    let mut with_bad_coupon = manual(
        &farmer.email,
        vec![OrderLineInput { product_id: rice.id, quantity: 1 }],
    );
    with_bad_coupon.coupon_code = Some("MISSING".into());
    assert_matches!(
        orders.create_manual_order(with_bad_coupon).await,
        Err(ServiceError::CouponNotFound(_))
    );
    assert_eq!(app.stock_of(rice.id).await, 2);
}

#[tokio::test]
async fn oversized_line_quantities_are_validation_errors() {
    let app = TestApp::new().await;
    let farmer = app.seed_user("farmer@example.com", UserRole::Customer).await;
    let rice = app.seed_product("Rice 5kg", dec!(80.00), 10).await;
    let orders = &app.state.services.orders;

    assert_matches!(
        orders
            .create_manual_order(manual(
                &farmer.email,
                vec![
                    OrderLineInput { product_id: rice.id, quantity: i32::MAX },
                    OrderLineInput { product_id: rice.id, quantity: 1 },
                ],
            ))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    // Each line is within bounds but their sum is not.
    assert_matches!(
        orders
            .create_manual_order(manual(
                &farmer.email,
                vec![
                    OrderLineInput { product_id: rice.id, quantity: 10_000 },
                    OrderLineInput { product_id: rice.id, quantity: 10_000 },
                ],
            ))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(app.stock_of(rice.id).await, 10);
}

#[tokio::test]
async fn failed_payment_leaves_order_pending() {
    use agrimart_api::services::commerce::order_service::RecordPaymentInput;

    let app = TestApp::new().await;
    let farmer = app.seed_user("farmer@example.com", UserRole::Customer).await;
    let rice = app.seed_product("Rice 5kg", dec!(80.00), 10).await;
    let mut input = manual(
        &farmer.email,
        vec![OrderLineInput { product_id: rice.id, quantity: 1 }],
    );
    input.payment_mode = Some("Cheque".into());
    let orders = &app.state.services.orders;
    let detail = orders.create_manual_order(input).await.unwrap();

    let failed = orders
        .record_payment(
            detail.order.id,
            RecordPaymentInput { status: PaymentStatus::Failed, reference: None },
        )
        .await
        .unwrap();
    assert_eq!(failed.order.payment_status, PaymentStatus::Failed);
    assert_eq!(failed.order.status, OrderStatus::Pending);
    assert!(failed.payment.is_none());

    let (payments, total) = orders.list_payments(1, 20).await.unwrap();
    assert_eq!(total, 0);
    assert!(payments.is_empty());
}
