use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser, Capability},
    entities::OrderModel,
    handlers::{
        common::{created_response, JsonOrDefault, PaginatedResponse, PaginationParams},
        AppState,
    },
    services::commerce::order_service::{CreateOrderInput, OrderDetail},
    ApiResponse, ApiResult,
};

pub fn order_routes() -> Router<AppState> {
    let place = Router::new()
        .route("/", post(create_order))
        .with_capability(Capability::PlaceOrder);

    let read = Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .with_capability(Capability::ViewOwnOrders);

    place.merge(read)
}

/// Places an order from the caller's active cart.
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    JsonOrDefault(input): JsonOrDefault<CreateOrderInput>,
) -> Result<Response, crate::errors::ServiceError> {
    let order = state
        .services
        .orders
        .create_order_from_cart(user.user_id, input)
        .await?;
    Ok(created_response(order))
}

/// Lists the caller's orders. Admins see every order.
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<OrderModel>> {
    let (page, per_page) = params.normalized();
    let (orders, total) = state
        .services
        .orders
        .list_orders(&user, page, per_page)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders, page, per_page, total,
    ))))
}

pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetail> {
    let order = state.services.orders.get_order(&user, id).await?;
    Ok(Json(ApiResponse::success(order)))
}
