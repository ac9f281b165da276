//! Order placement and the order/payment state machines.
//!
//! Orders are written once with snapshot prices; afterwards only `status`,
//! `payment_status` and `updated_at` change. Every creation path funnels
//! through [`materialize_order`], which also reserves stock.

use crate::{
    auth::{AuthUser, Capability},
    entities::{
        coupon, order, order_item, payment, user, Order, OrderItem, OrderModel, OrderStatus,
        Payment, PaymentStatus, User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{EmailTemplate, NotificationDispatcher, OrderLineSummary, OrderSummary},
    services::commerce::{
        cart_service::{self, CartLine},
        inventory_guard::{self, StockRequest},
        pricing_service::{self, PricingLine},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub const CASH_PAYMENT_MODE: &str = "Cash";

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct CreateOrderInput {
    #[validate(length(min = 1, max = 50))]
    pub payment_mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ManualOrderInput {
    #[validate(email)]
    pub user_email: String,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<OrderLineInput>,
    #[validate(length(max = 50))]
    pub coupon_code: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub payment_mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateOrderStatusInput {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RecordPaymentInput {
    pub status: PaymentStatus,
    #[validate(length(min = 1, max = 100))]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub product_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderModel,
    pub coupon_code: Option<String>,
    pub items: Vec<OrderItemView>,
    pub payment: Option<payment::Model>,
}

/// Everything needed to write an order. Unit prices are already the snapshot.
#[derive(Debug, Clone)]
pub(crate) struct OrderDraft {
    pub user_id: Uuid,
    pub lines: Vec<PricingLine>,
    pub coupon: Option<coupon::Model>,
    pub payment_mode: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

impl OrderDraft {
    pub fn from_cart_lines(
        user_id: Uuid,
        lines: &[CartLine],
        coupon: Option<coupon::Model>,
        payment_mode: impl Into<String>,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Self {
        Self {
            user_id,
            lines: lines.iter().map(CartLine::pricing_line).collect(),
            coupon,
            payment_mode: payment_mode.into(),
            status,
            payment_status,
        }
    }

    pub fn total(&self) -> Decimal {
        pricing_service::price_lines(self.lines.clone(), self.coupon.as_ref().map(|c| c.discount))
            .total
    }

    fn stock_requests(&self) -> Vec<StockRequest> {
        self.lines
            .iter()
            .map(|l| StockRequest {
                product_id: l.product_id,
                quantity: l.quantity,
            })
            .collect()
    }
}

/// Persisted order with its snapshot lines.
#[derive(Debug, Clone)]
pub(crate) struct MaterializedOrder {
    pub order: OrderModel,
    pub items: Vec<order_item::Model>,
    pub product_names: HashMap<Uuid, String>,
}

fn order_number(id: Uuid) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("AGM-{}", &simple[..12])
}

fn is_cash(payment_mode: &str) -> bool {
    payment_mode.trim().eq_ignore_ascii_case(CASH_PAYMENT_MODE)
}

fn normalized_mode(mode: Option<&str>) -> String {
    mode.map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(CASH_PAYMENT_MODE)
        .to_string()
}

/// Status pair a new order starts in.
fn initial_states(cash: bool) -> (OrderStatus, PaymentStatus) {
    if cash {
        (OrderStatus::Confirmed, PaymentStatus::Completed)
    } else {
        (OrderStatus::Pending, PaymentStatus::Pending)
    }
}

fn cash_reference() -> String {
    format!("CASH-{}", Uuid::new_v4().simple())
}

/// Inserts the order and its items and reserves stock. Runs on the caller's
/// transaction; any error leaves nothing behind once it is rolled back.
pub(crate) async fn materialize_order<C: ConnectionTrait>(
    conn: &C,
    draft: &OrderDraft,
) -> Result<MaterializedOrder, ServiceError> {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let breakdown = pricing_service::price_lines(
        draft.lines.clone(),
        draft.coupon.as_ref().map(|c| c.discount),
    );

    let order = order::ActiveModel {
        id: Set(order_id),
        order_number: Set(order_number(order_id)),
        user_id: Set(draft.user_id),
        total_amount: Set(breakdown.total),
        status: Set(draft.status),
        payment_status: Set(draft.payment_status),
        payment_mode: Set(draft.payment_mode.clone()),
        coupon_id: Set(draft.coupon.as_ref().map(|c| c.id)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(breakdown.lines.len());
    let mut product_names = HashMap::new();
    for line in &breakdown.lines {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            product_price: Set(line.unit_price),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
        product_names.insert(line.product_id, line.product_name.clone());
        items.push(item);
    }

    inventory_guard::reserve_stock(conn, &draft.stock_requests()).await?;

    Ok(MaterializedOrder {
        order,
        items,
        product_names,
    })
}

/// Writes the completed payment row. The reference is unique across payments.
pub(crate) async fn record_completed_payment<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    reference: &str,
) -> Result<payment::Model, ServiceError> {
    let now = Utc::now();
    Ok(payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        amount: Set(order.total_amount),
        reference: Set(reference.to_string()),
        payment_status: Set(PaymentStatus::Completed),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?)
}

pub(crate) async fn reference_exists<C: ConnectionTrait>(
    conn: &C,
    reference: &str,
) -> Result<bool, ServiceError> {
    Ok(Payment::find()
        .filter(payment::Column::Reference.eq(reference))
        .count(conn)
        .await?
        > 0)
}

pub(crate) fn summarize(
    materialized: &MaterializedOrder,
    customer: &user::Model,
    coupon_code: Option<String>,
) -> OrderSummary {
    OrderSummary {
        order_number: materialized.order.order_number.clone(),
        customer_name: customer.full_name.clone(),
        total_amount: materialized.order.total_amount,
        status: materialized.order.status.to_string(),
        payment_status: materialized.order.payment_status.to_string(),
        coupon_code,
        items: materialized
            .items
            .iter()
            .map(|item| OrderLineSummary {
                product_name: materialized
                    .product_names
                    .get(&item.product_id)
                    .cloned()
                    .unwrap_or_else(|| item.product_id.to_string()),
                quantity: item.quantity,
                unit_price: item.product_price,
            })
            .collect(),
    }
}

/// Allowed order status moves. Terminal states have no outgoing edges.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Confirmed, Shipped)
            | (Shipped, Delivered)
            | (Pending, Cancelled)
            | (Confirmed, Cancelled)
            | (Shipped, Cancelled)
    )
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    notifications: NotificationDispatcher,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifications,
        }
    }

    /// Turns the caller's cart into an order.
    ///
    /// Cash orders are settled immediately: the cart is claimed, a completed
    /// payment is written and the order is `confirmed`. Any other mode leaves
    /// the order `pending` until a payment outcome is recorded; its cart is
    /// emptied but stays unpaid.
    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn create_order_from_cart(
        &self,
        user_id: Uuid,
        input: CreateOrderInput,
    ) -> Result<OrderDetail, ServiceError> {
        input.validate()?;
        let payment_mode = normalized_mode(input.payment_mode.as_deref());
        let cash = is_cash(&payment_mode);

        let txn = self.db.begin().await?;

        let customer = User::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound(user_id.to_string()))?;
        let cart = cart_service::find_active_cart(&txn, user_id)
            .await?
            .ok_or(ServiceError::EmptyCart)?;

        let lines = cart_service::load_lines(&txn, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let products: HashMap<_, _> = lines
            .iter()
            .map(|l| (l.product.id, l.product.clone()))
            .collect();
        let requests: Vec<StockRequest> = lines.iter().map(CartLine::stock_request).collect();
        inventory_guard::ensure_available(&products, &requests)?;

        let coupon = cart_service::load_coupon(&txn, cart.coupon_id).await?;

        if cash {
            cart_service::claim_cart(&txn, &cart).await?;
        } else {
            // Deleting exactly the items we priced serialises a double submit.
            let removed = cart_service::clear_cart(&txn, cart.id).await?;
            if removed != lines.len() as u64 {
                return Err(ServiceError::Conflict(
                    "Cart changed while the order was being placed".to_string(),
                ));
            }
        }

        let (status, payment_status) = initial_states(cash);
        let draft = OrderDraft::from_cart_lines(
            customer.id,
            &lines,
            coupon.clone(),
            payment_mode.clone(),
            status,
            payment_status,
        );
        let materialized = materialize_order(&txn, &draft).await?;

        let payment = if cash {
            Some(record_completed_payment(&txn, &materialized.order, &cash_reference()).await?)
        } else {
            None
        };

        cart_service::clear_cart(&txn, cart.id).await?;
        txn.commit().await?;

        let order = &materialized.order;
        info!(order_id = %order.id, total = %order.total_amount, %payment_mode, "Order created from cart");
        self.after_create(&materialized, &customer, coupon.as_ref(), payment.as_ref());

        Ok(self.detail(materialized, coupon.map(|c| c.code), payment))
    }

    /// Administrative order from an ad hoc item list.
    #[instrument(skip(self, input), fields(user_email = %input.user_email, items = input.items.len()))]
    pub async fn create_manual_order(
        &self,
        input: ManualOrderInput,
    ) -> Result<OrderDetail, ServiceError> {
        input.validate()?;
        let payment_mode = normalized_mode(input.payment_mode.as_deref());
        let cash = is_cash(&payment_mode);

        for line in &input.items {
            line.validate()?;
        }
        let requests: Vec<StockRequest> = input
            .items
            .iter()
            .map(|l| StockRequest {
                product_id: l.product_id,
                quantity: l.quantity,
            })
            .collect();

        let txn = self.db.begin().await?;

        let email = input.user_email.trim();
        let customer = User::find()
            .filter(user::Column::Email.eq(email))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound(email.to_string()))?;
        if !customer.is_active {
            return Err(ServiceError::ValidationError(
                "User account is inactive".to_string(),
            ));
        }

        let products =
            inventory_guard::load_products(&txn, requests.iter().map(|r| r.product_id)).await?;
        inventory_guard::ensure_available(&products, &requests)?;
        let coupon =
            cart_service::resolve_optional_coupon(&txn, input.coupon_code.as_deref()).await?;

        let mut lines = Vec::with_capacity(requests.len());
        for request in &requests {
            let product = products.get(&request.product_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", request.product_id))
            })?;
            lines.push(PricingLine {
                product_id: product.id,
                product_name: product.name.clone(),
                unit_price: product.price,
                quantity: request.quantity,
            });
        }

        let (status, payment_status) = initial_states(cash);
        let draft = OrderDraft {
            user_id: customer.id,
            lines,
            coupon: coupon.clone(),
            payment_mode: payment_mode.clone(),
            status,
            payment_status,
        };
        let materialized = materialize_order(&txn, &draft).await?;

        let payment = if cash {
            Some(record_completed_payment(&txn, &materialized.order, &cash_reference()).await?)
        } else {
            None
        };

        txn.commit().await?;

        info!(order_id = %materialized.order.id, %payment_mode, "Manual order created");
        self.after_create(&materialized, &customer, coupon.as_ref(), payment.as_ref());

        Ok(self.detail(materialized, coupon.map(|c| c.code), payment))
    }

    /// Moves an order along the status machine. Cancelling returns stock.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = find_order(&txn, order_id).await?;
        let old_status = order.status;

        let transition_error = || ServiceError::InvalidStatusTransition {
            from: old_status.to_string(),
            to: new_status.to_string(),
        };
        if !is_valid_transition(old_status, new_status) {
            return Err(transition_error());
        }
        if new_status == OrderStatus::Confirmed && order.payment_status != PaymentStatus::Completed
        {
            return Err(transition_error());
        }

        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status.as_str()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(old_status.as_str()))
            .exec(&txn)
            .await?;
        if result.rows_affected != 1 {
            return Err(ServiceError::Conflict(format!(
                "Order {} was modified concurrently",
                order_id
            )));
        }

        if new_status == OrderStatus::Cancelled {
            let items = OrderItem::find()
                .filter(order_item::Column::OrderId.eq(order_id))
                .all(&txn)
                .await?;
            let requests: Vec<StockRequest> = items
                .iter()
                .map(|i| StockRequest {
                    product_id: i.product_id,
                    quantity: i.quantity,
                })
                .collect();
            inventory_guard::release_stock(&txn, &requests).await?;
        }

        let updated = find_order(&txn, order_id).await?;
        txn.commit().await?;

        info!(%order_id, old_status = %old_status, new_status = %new_status, "Order status updated");
        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id,
            old_status: old_status.to_string(),
            new_status: new_status.to_string(),
        });
        self.notify_status(&updated).await;

        Ok(updated)
    }

    /// Records the outcome of a deferred payment.
    #[instrument(skip(self, input), fields(status = %input.status))]
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        input: RecordPaymentInput,
    ) -> Result<OrderDetail, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let order = find_order(&txn, order_id).await?;
        let transition_error = || ServiceError::InvalidStatusTransition {
            from: order.payment_status.to_string(),
            to: input.status.to_string(),
        };
        if order.payment_status != PaymentStatus::Pending
            || input.status == PaymentStatus::Pending
            || order.status == OrderStatus::Cancelled
        {
            return Err(transition_error());
        }

        let completed = input.status == PaymentStatus::Completed;
        let reference = if completed {
            let r = input
                .reference
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("MANUAL-{}", Uuid::new_v4().simple()));
            if reference_exists(&txn, &r).await? {
                return Err(ServiceError::PaymentAlreadyProcessed(r));
            }
            Some(r)
        } else {
            None
        };

        let mut update = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(input.status.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
        if completed && order.status == OrderStatus::Pending {
            update = update.col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Confirmed.as_str()),
            );
        }
        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.as_str()))
            .exec(&txn)
            .await?;
        if result.rows_affected != 1 {
            return Err(transition_error());
        }

        let updated = find_order(&txn, order_id).await?;
        if let Some(r) = &reference {
            record_completed_payment(&txn, &updated, r).await?;
        }
        txn.commit().await?;

        info!(%order_id, payment_status = %updated.payment_status, "Payment outcome recorded");
        self.event_sender.send_or_log(Event::PaymentRecorded {
            order_id,
            reference,
            status: updated.payment_status.to_string(),
        });
        if updated.status != order.status {
            self.event_sender.send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: order.status.to_string(),
                new_status: updated.status.to_string(),
            });
        }
        self.notify_status(&updated).await;

        self.load_detail(updated).await
    }

    /// Orders visible to the caller, newest first.
    pub async fn list_orders(
        &self,
        caller: &AuthUser,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if !caller.can(Capability::ViewAllOrders) {
            query = query.filter(order::Column::UserId.eq(caller.user_id));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Order detail. Other users' orders are reported as not found.
    pub async fn get_order(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderDetail, ServiceError> {
        let order = find_order(&*self.db, order_id).await?;
        if order.user_id != caller.user_id && !caller.can(Capability::ViewAllOrders) {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        self.load_detail(order).await
    }

    pub async fn list_payments(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<payment::Model>, u64), ServiceError> {
        let paginator = Payment::find()
            .order_by_desc(payment::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let payments = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((payments, total))
    }

    async fn load_detail(&self, order: OrderModel) -> Result<OrderDetail, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        let product_names =
            inventory_guard::load_products(&*self.db, items.iter().map(|i| i.product_id))
                .await?
                .into_iter()
                .map(|(id, p)| (id, p.name))
                .collect();
        let coupon = cart_service::load_coupon(&*self.db, order.coupon_id).await?;
        let payment = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await?;

        Ok(self.detail(
            MaterializedOrder {
                order,
                items,
                product_names,
            },
            coupon.map(|c| c.code),
            payment,
        ))
    }

    fn detail(
        &self,
        materialized: MaterializedOrder,
        coupon_code: Option<String>,
        payment: Option<payment::Model>,
    ) -> OrderDetail {
        let items = materialized
            .items
            .iter()
            .map(|item| OrderItemView {
                id: item.id,
                product_id: item.product_id,
                product_name: materialized
                    .product_names
                    .get(&item.product_id)
                    .cloned()
                    .unwrap_or_default(),
                quantity: item.quantity,
                product_price: item.product_price,
                line_total: pricing_service::line_total(item.product_price, item.quantity),
            })
            .collect();

        OrderDetail {
            order: materialized.order,
            coupon_code,
            items,
            payment,
        }
    }

    fn after_create(
        &self,
        materialized: &MaterializedOrder,
        customer: &user::Model,
        coupon: Option<&coupon::Model>,
        payment: Option<&payment::Model>,
    ) {
        let order = &materialized.order;
        self.event_sender.send_or_log(Event::OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            payment_mode: order.payment_mode.clone(),
        });
        if let Some(payment) = payment {
            self.event_sender.send_or_log(Event::PaymentRecorded {
                order_id: order.id,
                reference: Some(payment.reference.clone()),
                status: payment.payment_status.to_string(),
            });
        }

        let summary = summarize(materialized, customer, coupon.map(|c| c.code.clone()));
        self.notifications
            .notify(EmailTemplate::OrderConfirmation, &customer.email, &summary);
    }

    async fn notify_status(&self, order: &OrderModel) {
        let customer = match User::find_by_id(order.user_id).one(&*self.db).await {
            Ok(Some(customer)) => customer,
            Ok(None) => return,
            Err(e) => {
                warn!(order_id = %order.id, "Skipping status notification: {}", e);
                return;
            }
        };

        let summary = OrderSummary {
            order_number: order.order_number.clone(),
            customer_name: customer.full_name.clone(),
            total_amount: order.total_amount,
            status: order.status.to_string(),
            payment_status: order.payment_status.to_string(),
            coupon_code: None,
            items: Vec::new(),
        };
        self.notifications
            .notify(EmailTemplate::OrderStatusUpdate, &customer.email, &summary);
    }
}

async fn find_order<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<OrderModel, ServiceError> {
    Order::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}
