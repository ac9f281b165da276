mod common;

use agrimart_api::entities::{Order, UserRole};
use axum::http::{Method, StatusCode};
use common::{charge, charge_success_body, TestApp, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;

#[tokio::test]
async fn webhook_settles_cart_and_acknowledges_replays() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let maize = app.seed_product("Maize flour 2kg", dec!(100.00), 10).await;
    let cart = app.seed_cart(&buyer, &[(&maize, 1)], None).await;
    let body = charge_success_body("T-HOOK", cart.uid, &buyer.email, 10000);

    let (status, ack) = app.post_webhook(&body, Some(WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["reference"], "T-HOOK");

    let (status, ack) = app.post_webhook(&body, Some(WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "already_processed");

    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 1);
    assert_eq!(app.stock_of(maize.id).await, 9);
}

#[tokio::test]
async fn webhook_rejects_bad_or_missing_signatures() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let maize = app.seed_product("Maize flour 2kg", dec!(100.00), 10).await;
    let cart = app.seed_cart(&buyer, &[(&maize, 1)], None).await;
    let body = charge_success_body("T-FORGED", cart.uid, &buyer.email, 10000);

    let (status, _) = app.post_webhook(&body, Some("sk_wrong_secret")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.post_webhook(&body, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
    assert_eq!(app.stock_of(maize.id).await, 10);
}

#[tokio::test]
async fn webhook_ignores_other_events() {
    let app = TestApp::new().await;
    let body = json!({ "event": "transfer.success", "data": { "reference": "TR-1" } })
        .to_string()
        .into_bytes();

    let (status, ack) = app.post_webhook(&body, Some(WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({ "status": "ignored" }));
}

#[tokio::test]
async fn webhook_business_failures_surface_as_client_errors() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let maize = app.seed_product("Maize flour 2kg", dec!(100.00), 10).await;
    let cart = app.seed_cart(&buyer, &[(&maize, 1)], None).await;

    let underpaid = charge_success_body("T-LOW", cart.uid, &buyer.email, 100);
    let (status, body) = app.post_webhook(&underpaid, Some(WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap_or_default().contains("mismatch"));

    let malformed = br#"{"event":"charge.success","data":{"reference":"T-BAD"}}"#;
    let (status, _) = app.post_webhook(malformed, Some(WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_requires_reference_and_settles_verified_payment() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let honey = app.seed_product("Honey 500g", dec!(35.50), 10).await;
    let cart = app.seed_cart(&buyer, &[(&honey, 2)], None).await;
    app.gateway
        .register_charge(charge("T-CB", cart.uid, &buyer.email, 7100));

    let (status, _) = app
        .request(Method::GET, "/api/v1/payments/callback", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/payments/callback?reference=T-CB",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["outcome"], "settled");
    assert_eq!(body["data"]["reference"], "T-CB");

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/payments/callback?reference=T-CB",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "already_processed");
}

#[tokio::test]
async fn customer_checkout_over_http() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let token = app.token_for(&buyer);
    let beans = app.seed_product("Beans 1kg", dec!(15.00), 10).await;

    let (status, _) = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(&token),
            Some(json!({ "product_id": beans.id, "quantity": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().map(Vec::len), Some(1));

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/payments/initiate",
            Some(&token),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["amount_minor"], 4500);
    assert!(body["data"]["authorization_url"]
        .as_str()
        .unwrap_or_default()
        .starts_with("https://checkout.test/"));

    let (status, body) = app
        .request(Method::POST, "/api/v1/orders", Some(&token), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "confirmed");
    let order_id = body["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, body) = app
        .request(Method::GET, "/api/v1/orders", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pagination"]["total"], 1);

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"][0]["quantity"], 3);

    // Another customer cannot see it.
    let other = app.seed_user("other@example.com", UserRole::Customer).await;
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            Some(&app.token_for(&other)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let admin = app.seed_user("admin@example.com", UserRole::Admin).await;
    let rice = app.seed_product("Rice 5kg", dec!(80.00), 10).await;
    let cart = app.seed_cart(&buyer, &[(&rice, 1)], None).await;
    let customer_token = app.token_for(&buyer);
    let admin_token = app.token_for(&admin);

    let (status, _) = app
        .request(Method::GET, "/api/v1/admin/carts", Some(&customer_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(Method::GET, "/api/v1/admin/carts", Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pagination"]["total"], 1);

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/admin/carts/{}", cart.uid),
            Some(&admin_token),
            Some(json!({ "items": [{ "product_id": rice.id, "quantity": 4 }], "coupon_code": null })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"][0]["quantity"], 4);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/admin/orders",
            Some(&admin_token),
            Some(json!({
                "user_email": "buyer@example.com",
                "items": [{ "product_id": rice.id, "quantity": 2 }],
                "payment_mode": "Bank transfer"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    let order_id = body["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/admin/orders/{}/status", order_id),
            Some(&admin_token),
            Some(json!({ "status": "shipped" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/admin/orders/{}/payment", order_id),
            Some(&admin_token),
            Some(json!({ "status": "completed", "reference": "BANK-991" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["data"]["payment_status"], "completed");

    let (status, body) = app
        .request(Method::GET, "/api/v1/admin/payments", Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pagination"]["total"], 1);
    assert_eq!(body["data"]["data"][0]["reference"], "BANK-991");

    // Admins see every order.
    let (_, body) = app
        .request(Method::GET, "/api/v1/orders", Some(&admin_token), None)
        .await;
    assert_eq!(body["data"]["pagination"]["total"], 1);
}

#[tokio::test]
async fn health_endpoints() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let (status, body) = app.request(Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn invalid_tokens_are_rejected() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/api/v1/orders", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn malformed_request_bodies_use_the_error_envelope() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", UserRole::Customer).await;
    let token = app.token_for(&buyer);

    let (status, body) = app
        .request_raw(Method::POST, "/api/v1/cart/items", Some(&token), "{\"product_id\": ")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad Request");
    assert!(body["message"].is_string());
    assert!(body["request_id"].is_string());

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(&token),
            Some(json!({ "product_id": "not-a-uuid", "quantity": "three" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["request_id"].is_string());

    let (status, _) = app
        .request(Method::POST, "/api/v1/cart/items", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Optional bodies may be omitted but not garbled.
    let (status, body) = app
        .request_raw(Method::POST, "/api/v1/orders", Some(&token), "not json")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    // An omitted body reaches the service, which refuses the empty cart.
    let (status, body) = app
        .request(Method::POST, "/api/v1/orders", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body["message"].as_str().unwrap_or_default().contains("JSON"));
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
}
