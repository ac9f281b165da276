//! Customer cart endpoints. Every route acts on the caller's own active cart.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser, Capability},
    handlers::{common::AppJson, AppState},
    services::commerce::cart_service::{
        AddCartItemInput, ApplyCouponInput, CartView, UpdateCartItemInput,
    },
    ApiResponse, ApiResult,
};

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_item))
        .route("/items/:item_id", put(update_item).delete(remove_item))
        .route("/coupon", post(apply_coupon))
        .with_capability(Capability::ManageOwnCart)
}

/// Returns the caller's cart, creating it on first use.
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.cart.get_cart(user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<AddCartItemInput>,
) -> ApiResult<CartView> {
    let cart = state.services.cart.add_item(user.user_id, payload).await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    AppJson(payload): AppJson<UpdateCartItemInput>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .cart
        .update_item(user.user_id, item_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = state.services.cart.remove_item(user.user_id, item_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Attaches a coupon by code; `null` or blank detaches it.
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<ApplyCouponInput>,
) -> ApiResult<CartView> {
    let cart = state.services.cart.apply_coupon(user.user_id, payload).await?;
    Ok(Json(ApiResponse::success(cart)))
}
