mod common;

use agrimart_api::{
    entities::{Cart, OrderStatus, PaymentStatus, UserRole},
    errors::ServiceError,
    services::commerce::order_service::{CreateOrderInput, RecordPaymentInput},
};
use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;

#[tokio::test]
async fn cash_order_settles_immediately() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("wanjiku@example.com", UserRole::Customer).await;
    let maize = app.seed_product("Maize flour 2kg", dec!(100.00), 10).await;
    let coupon = app.seed_coupon("HARVEST50", dec!(50.00), true).await;
    let cart = app.seed_cart(&buyer, &[(&maize, 2)], Some(&coupon)).await;

    let detail = app
        .state
        .services
        .orders
        .create_order_from_cart(buyer.id, CreateOrderInput::default())
        .await
        .unwrap();

    assert_eq!(detail.order.total_amount, dec!(150.00));
    assert_eq!(detail.order.status, OrderStatus::Confirmed);
    assert_eq!(detail.order.payment_status, PaymentStatus::Completed);
    assert_eq!(detail.order.payment_mode, "Cash");
    assert_eq!(detail.coupon_code.as_deref(), Some("HARVEST50"));
    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.items[0].product_price, dec!(100.00));
    let payment = detail.payment.expect("cash orders record a payment");
    assert!(payment.reference.starts_with("CASH-"));
    assert_eq!(payment.amount, dec!(150.00));

    assert_eq!(app.stock_of(maize.id).await, 8);
    let cart = Cart::find_by_id(cart.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(cart.is_paid);
    assert_eq!(cart.coupon_id, None);

    let sent = app.notifier.wait_for(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].subject,
        format!("Order Confirmation: {}", detail.order.order_number)
    );
    assert!(sent[0].body.contains("Coupon Applied: HARVEST50"));
    assert!(sent[0].body.contains("Total Amount: KES 150"));
}

#[tokio::test]
async fn deferred_order_stays_pending_until_payment_recorded() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("otieno@example.com", UserRole::Customer).await;
    let beans = app.seed_product("Beans 1kg", dec!(15.00), 10).await;
    let cart = app.seed_cart(&buyer, &[(&beans, 4)], None).await;
    let orders = &app.state.services.orders;

    let detail = orders
        .create_order_from_cart(
            buyer.id,
            CreateOrderInput { payment_mode: Some("M-Pesa".into()) },
        )
        .await
        .unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert_eq!(detail.order.payment_status, PaymentStatus::Pending);
    assert!(detail.payment.is_none());
    assert_eq!(app.stock_of(beans.id).await, 6);

    // The cart is emptied but not marked paid.
    let cart = Cart::find_by_id(cart.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(!cart.is_paid);
    assert!(app
        .state
        .services
        .cart
        .get_cart(buyer.id)
        .await
        .unwrap()
        .items
        .is_empty());

    // Confirming without payment is refused.
    assert_matches!(
        orders.update_status(detail.order.id, OrderStatus::Confirmed).await,
        Err(ServiceError::InvalidStatusTransition { .. })
    );

    let paid = orders
        .record_payment(
            detail.order.id,
            RecordPaymentInput {
                status: PaymentStatus::Completed,
                reference: Some("MPESA-QWE123".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(paid.order.payment_status, PaymentStatus::Completed);
    assert_eq!(paid.order.status, OrderStatus::Confirmed);
    assert_eq!(
        paid.payment.map(|p| p.reference).as_deref(),
        Some("MPESA-QWE123")
    );

    // A second outcome for the same order is rejected.
    assert_matches!(
        orders
            .record_payment(
                detail.order.id,
                RecordPaymentInput { status: PaymentStatus::Failed, reference: None },
            )
            .await,
        Err(ServiceError::InvalidStatusTransition { .. })
    );
}

#[tokio::test]
async fn empty_cart_cannot_be_ordered() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;

    assert_matches!(
        app.state
            .services
            .orders
            .create_order_from_cart(buyer.id, CreateOrderInput::default())
            .await,
        Err(ServiceError::EmptyCart)
    );

    app.state.services.cart.get_cart(buyer.id).await.unwrap();
    assert_matches!(
        app.state
            .services
            .orders
            .create_order_from_cart(buyer.id, CreateOrderInput::default())
            .await,
        Err(ServiceError::EmptyCart)
    );
}

#[tokio::test]
async fn insufficient_stock_leaves_everything_untouched() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let eggs = app.seed_product("Eggs tray", dec!(12.00), 3).await;
    // Two lines of the same product are checked together.
    let cart = app.seed_cart(&buyer, &[(&eggs, 2), (&eggs, 2)], None).await;

    assert_matches!(
        app.state
            .services
            .orders
            .create_order_from_cart(buyer.id, CreateOrderInput::default())
            .await,
        Err(ServiceError::InsufficientStock { available: 3, .. })
    );

    assert_eq!(app.stock_of(eggs.id).await, 3);
    let view = app.state.services.cart.get_cart_by_uid(cart.uid).await.unwrap();
    assert_eq!(view.items.len(), 2);
}

#[tokio::test]
async fn status_machine_and_cancellation_restock() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let rice = app.seed_product("Rice 5kg", dec!(80.00), 5).await;
    app.seed_cart(&buyer, &[(&rice, 2)], None).await;
    let orders = &app.state.services.orders;

    let detail = orders
        .create_order_from_cart(buyer.id, CreateOrderInput::default())
        .await
        .unwrap();
    let id = detail.order.id;
    assert_eq!(app.stock_of(rice.id).await, 3);

    assert_matches!(
        orders.update_status(id, OrderStatus::Delivered).await,
        Err(ServiceError::InvalidStatusTransition { .. })
    );

    let shipped = orders.update_status(id, OrderStatus::Shipped).await.unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);

    let cancelled = orders.update_status(id, OrderStatus::Cancelled).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(app.stock_of(rice.id).await, 5);

    assert_matches!(
        orders.update_status(id, OrderStatus::Pending).await,
        Err(ServiceError::InvalidStatusTransition { .. })
    );

    // Confirmation plus two status updates.
    let sent = app.notifier.wait_for(3).await;
    assert_eq!(sent.len(), 3);
}

#[tokio::test]
async fn order_items_keep_their_snapshot_price() {
    use agrimart_api::entities::product;
    use sea_orm::{ActiveModelTrait, Set};

    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let milk = app.seed_product("Milk 1l", dec!(60.00), 10).await;
    app.seed_cart(&buyer, &[(&milk, 1)], None).await;

    let detail = app
        .state
        .services
        .orders
        .create_order_from_cart(buyer.id, CreateOrderInput::default())
        .await
        .unwrap();

    let mut active: product::ActiveModel = milk.into();
    active.price = Set(dec!(75.00));
    active.update(&*app.state.db).await.unwrap();

    let caller = agrimart_api::auth::AuthUser {
        user_id: buyer.id,
        email: buyer.email.clone(),
        role: UserRole::Customer,
    };
    let reloaded = app
        .state
        .services
        .orders
        .get_order(&caller, detail.order.id)
        .await
        .unwrap();
    assert_eq!(reloaded.items[0].product_price, dec!(60.00));
    assert_eq!(reloaded.order.total_amount, dec!(60.00));
}
