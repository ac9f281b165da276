//! Back-office endpoints: manual orders, order and payment state, cart repair.

use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, Capability},
    entities::{OrderModel, PaymentModel},
    errors::ServiceError,
    handlers::{
        common::{created_response, AppJson, PaginatedResponse, PaginationParams},
        AppState,
    },
    services::commerce::{
        cart_service::{CartView, ReplaceCartInput},
        order_service::{ManualOrderInput, OrderDetail, RecordPaymentInput, UpdateOrderStatusInput},
    },
    ApiResponse, ApiResult,
};

pub fn admin_routes() -> Router<AppState> {
    let manual_orders = Router::new()
        .route("/orders", post(create_manual_order))
        .with_capability(Capability::CreateManualOrder);

    let order_management = Router::new()
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/payment", post(record_payment))
        .with_capability(Capability::ManageOrders);

    let payments = Router::new()
        .route("/payments", get(list_payments))
        .with_capability(Capability::ViewPayments);

    let carts = Router::new()
        .route("/carts", get(list_carts))
        .route("/carts/:cart_id", get(get_cart).put(replace_cart))
        .with_capability(Capability::ManageCarts);

    Router::new()
        .merge(manual_orders)
        .merge(order_management)
        .merge(payments)
        .merge(carts)
}

pub async fn create_manual_order(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ManualOrderInput>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.create_manual_order(payload).await?;
    Ok(created_response(order))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UpdateOrderStatusInput>,
) -> ApiResult<OrderModel> {
    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Records the outcome of a deferred (non-cash) payment.
pub async fn record_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<RecordPaymentInput>,
) -> ApiResult<OrderDetail> {
    let order = state.services.orders.record_payment(id, payload).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<PaymentModel>> {
    let (page, per_page) = params.normalized();
    let (payments, total) = state.services.orders.list_payments(page, per_page).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        payments, page, per_page, total,
    ))))
}

/// Unpaid carts with live pricing.
pub async fn list_carts(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<CartView>> {
    let (page, per_page) = params.normalized();
    let (carts, total) = state
        .services
        .cart
        .list_unpaid_carts(page, per_page)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        carts, page, per_page, total,
    ))))
}

pub async fn get_cart(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = state.services.cart.get_cart_by_uid(cart_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn replace_cart(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    AppJson(payload): AppJson<ReplaceCartInput>,
) -> ApiResult<CartView> {
    let cart = state.services.cart.replace_cart(cart_id, payload).await?;
    Ok(Json(ApiResponse::success(cart)))
}
