#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agrimart_api::{
    auth::AuthService,
    config::AppConfig,
    db,
    entities::{cart, cart_item, coupon, product, user, Product, UserRole},
    events::{self, EventSender},
    handlers::AppServices,
    notifications::{EmailMessage, NotificationError, Notifier},
    payments::{
        signature, ChargeData, Customer, GatewayError, InitializeRequest, InitializedPayment,
        PaymentGateway,
    },
    AppState,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_agrimart_integration_runs";
pub const WEBHOOK_SECRET: &str = "sk_test_webhook_secret";

/// Gateway double. Initialization hands out sequential references; verify
/// answers from charges registered by the test.
#[derive(Default)]
pub struct StubGateway {
    pub initialized: Mutex<Vec<InitializeRequest>>,
    charges: Mutex<HashMap<String, ChargeData>>,
    pub verify_calls: Mutex<Vec<String>>,
}

impl StubGateway {
    pub fn register_charge(&self, charge: ChargeData) {
        self.charges
            .lock()
            .unwrap()
            .insert(charge.reference.clone(), charge);
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<InitializedPayment, GatewayError> {
        let mut initialized = self.initialized.lock().unwrap();
        initialized.push(request);
        let reference = format!("ref-{}", initialized.len());
        Ok(InitializedPayment {
            authorization_url: format!("https://checkout.test/{}", reference),
            reference,
            access_code: None,
        })
    }

    async fn verify(&self, reference: &str) -> Result<ChargeData, GatewayError> {
        self.verify_calls
            .lock()
            .unwrap()
            .push(reference.to_string());
        self.charges
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected("Transaction reference not found".into()))
    }
}

/// Keeps every message it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

impl RecordingNotifier {
    /// Waits for background delivery to record at least `count` messages.
    pub async fn wait_for(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..50 {
            {
                let sent = self.sent.lock().unwrap();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.sent.lock().unwrap().clone()
    }
}

/// Application harness backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub auth: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // A single connection keeps the in-memory database alive and shared.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.paystack_secret_key = Some(WEBHOOK_SECRET.to_string());
        cfg.payment_callback_url = Some("https://shop.test/payments/callback".to_string());
        cfg.currency_label = "KES".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let auth = Arc::new(AuthService::from_config(&cfg));

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            gateway.clone(),
            notifier.clone(),
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            auth: auth.clone(),
            services,
        };

        Self {
            router: agrimart_api::build_router(state.clone()),
            state,
            gateway,
            notifier,
            auth,
            _event_task: event_task,
        }
    }

    pub async fn seed_user(&self, email: &str, role: UserRole) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            full_name: Set(format!("{} Tester", email.split('@').next().unwrap_or("Test"))),
            role: Set(role),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed user")
    }

    pub async fn seed_inactive_user(&self, email: &str) -> user::Model {
        let user = self.seed_user(email, UserRole::Customer).await;
        let mut active: user::ActiveModel = user.into();
        active.is_active = Set(false);
        active
            .update(&*self.state.db)
            .await
            .expect("failed to deactivate user")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.insert_product(name, price, stock, false).await
    }

    pub async fn seed_display_only_product(&self, name: &str, price: Decimal) -> product::Model {
        self.insert_product(name, price, 100, true).await
    }

    async fn insert_product(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        display_only: bool,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            stock: Set(stock),
            display_only: Set(display_only),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product")
    }

    pub async fn seed_coupon(&self, code: &str, discount: Decimal, active: bool) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount: Set(discount),
            active: Set(active),
            valid_from: Set(Utc::now() - ChronoDuration::days(1)),
            valid_to: Set(Utc::now() + ChronoDuration::days(30)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed coupon")
    }

    /// Creates an unpaid cart holding the given lines, bypassing the service layer.
    pub async fn seed_cart(
        &self,
        owner: &user::Model,
        lines: &[(&product::Model, i32)],
        coupon: Option<&coupon::Model>,
    ) -> cart::Model {
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            uid: Set(Uuid::new_v4()),
            user_id: Set(owner.id),
            is_paid: Set(false),
            coupon_id: Set(coupon.map(|c| c.id)),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed cart");

        for (product, quantity) in lines {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(*quantity),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            }
            .insert(&*self.state.db)
            .await
            .expect("failed to seed cart item");
        }
        cart
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        Product::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("product lookup")
            .expect("product exists")
            .stock
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        self.auth
            .issue_token(user.id, &user.email, user.role)
            .expect("token issuance")
    }

    /// JSON request through the full router. Returns the status and parsed body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("request")).await
    }

    /// Sends `body` verbatim as `application/json`, for bodies `request` cannot express.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).expect("request"))
            .await
    }

    /// Posts a raw webhook body signed with `secret`.
    pub async fn post_webhook(&self, body: &[u8], secret: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(secret) = secret {
            let sig = signature::sign(secret, body).expect("sign webhook");
            builder = builder.header(signature::SIGNATURE_HEADER, sig);
        }
        self.send(builder.body(Body::from(body.to_vec())).expect("request"))
            .await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("response body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
        };
        (status, body)
    }
}

/// Successful charge payload as the gateway reports it.
pub fn charge(reference: &str, cart_uid: Uuid, email: &str, amount_minor: i64) -> ChargeData {
    ChargeData {
        reference: reference.to_string(),
        status: Some("success".to_string()),
        amount: amount_minor,
        customer: Customer {
            email: Some(email.to_string()),
        },
        metadata: json!({ "cart_id": cart_uid.to_string() }),
    }
}

/// `charge.success` webhook body for a cart.
pub fn charge_success_body(reference: &str, cart_uid: Uuid, email: &str, amount_minor: i64) -> Vec<u8> {
    json!({
        "event": "charge.success",
        "data": {
            "reference": reference,
            "status": "success",
            "amount": amount_minor,
            "customer": { "email": email },
            "metadata": { "cart_id": cart_uid.to_string() }
        }
    })
    .to_string()
    .into_bytes()
}
