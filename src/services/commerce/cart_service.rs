use crate::{
    entities::{cart, cart_item, coupon, product, Cart, CartItem, CartModel, Coupon},
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    services::commerce::{
        inventory_guard::{self, StockRequest},
        pricing_service::{self, PriceBreakdown, PricingLine},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Shopping cart service.
///
/// Every user has at most one unpaid cart. It is created lazily, priced with
/// live product prices, and only cleared by order placement or settlement.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AddCartItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdateCartItemInput {
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ApplyCouponInput {
    #[validate(length(max = 50))]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CartLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ReplaceCartInput {
    pub items: Vec<CartLineInput>,
    #[validate(length(max = 50))]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Cart as shown to clients, priced at current product prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub user_id: Uuid,
    pub is_paid: bool,
    pub coupon_code: Option<String>,
    pub items: Vec<CartItemView>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// A cart item joined with the product it references.
#[derive(Debug, Clone)]
pub(crate) struct CartLine {
    pub item: cart_item::Model,
    pub product: product::Model,
}

impl CartLine {
    pub fn stock_request(&self) -> StockRequest {
        StockRequest {
            product_id: self.product.id,
            quantity: self.item.quantity,
        }
    }

    pub fn pricing_line(&self) -> PricingLine {
        PricingLine {
            product_id: self.product.id,
            product_name: self.product.name.clone(),
            unit_price: self.product.price,
            quantity: self.item.quantity,
        }
    }
}

fn normalized_code(code: Option<&str>) -> Option<&str> {
    code.map(str::trim).filter(|c| !c.is_empty())
}

pub(crate) async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<CartLine>, ServiceError> {
    let items = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await?;

    let products =
        inventory_guard::load_products(conn, items.iter().map(|i| i.product_id)).await?;

    items
        .into_iter()
        .map(|item| {
            let product = products.get(&item.product_id).cloned().ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;
            Ok(CartLine { item, product })
        })
        .collect()
}

pub(crate) async fn load_coupon<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Option<Uuid>,
) -> Result<Option<coupon::Model>, ServiceError> {
    match coupon_id {
        Some(id) => Ok(Coupon::find_by_id(id).one(conn).await?),
        None => Ok(None),
    }
}

/// Looks up a coupon by code. Only the `active` flag is enforced.
pub(crate) async fn resolve_coupon<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<coupon::Model, ServiceError> {
    let code = code.trim();
    let coupon = Coupon::find()
        .filter(coupon::Column::Code.eq(code))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::CouponNotFound(code.to_string()))?;

    if !coupon.active {
        return Err(ServiceError::CouponInactive(coupon.code));
    }
    Ok(coupon)
}

pub(crate) async fn resolve_optional_coupon<C: ConnectionTrait>(
    conn: &C,
    code: Option<&str>,
) -> Result<Option<coupon::Model>, ServiceError> {
    match normalized_code(code) {
        Some(code) => Ok(Some(resolve_coupon(conn, code).await?)),
        None => Ok(None),
    }
}

pub(crate) fn price_cart(lines: &[CartLine], coupon: Option<&coupon::Model>) -> PriceBreakdown {
    pricing_service::price_lines(
        lines.iter().map(CartLine::pricing_line),
        coupon.map(|c| c.discount),
    )
}

pub(crate) async fn find_unpaid_by_uid<C: ConnectionTrait>(
    conn: &C,
    cart_uid: Uuid,
) -> Result<CartModel, ServiceError> {
    Cart::find()
        .filter(cart::Column::Uid.eq(cart_uid))
        .filter(cart::Column::IsPaid.eq(false))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::CartNotFound(cart_uid.to_string()))
}

pub(crate) async fn find_active_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<CartModel>, ServiceError> {
    Ok(Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .filter(cart::Column::IsPaid.eq(false))
        .order_by_asc(cart::Column::CreatedAt)
        .one(conn)
        .await?)
}

/// Deletes every item and detaches the coupon. Returns the number of items removed.
pub(crate) async fn clear_cart<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<u64, ServiceError> {
    let deleted = CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;

    Cart::update_many()
        .col_expr(cart::Column::CouponId, Expr::value(Option::<Uuid>::None))
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart_id))
        .exec(conn)
        .await?;

    Ok(deleted.rows_affected)
}

/// Flips `is_paid` only if the cart is still unpaid. Exactly one caller wins.
pub(crate) async fn claim_cart<C: ConnectionTrait>(
    conn: &C,
    cart: &CartModel,
) -> Result<(), ServiceError> {
    let result = Cart::update_many()
        .col_expr(cart::Column::IsPaid, Expr::value(true))
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart.id))
        .filter(cart::Column::IsPaid.eq(false))
        .exec(conn)
        .await?;

    if result.rows_affected != 1 {
        return Err(ServiceError::CartNotFound(cart.uid.to_string()));
    }
    Ok(())
}

async fn build_view<C: ConnectionTrait>(
    conn: &C,
    cart: &CartModel,
) -> Result<CartView, ServiceError> {
    let lines = load_lines(conn, cart.id).await?;
    let coupon = load_coupon(conn, cart.coupon_id).await?;
    let breakdown = price_cart(&lines, coupon.as_ref());

    let items = lines
        .iter()
        .zip(breakdown.lines.iter())
        .map(|(line, priced)| CartItemView {
            id: line.item.id,
            product_id: line.product.id,
            product_name: priced.product_name.clone(),
            unit_price: priced.unit_price,
            quantity: priced.quantity,
            line_total: priced.line_total,
        })
        .collect();

    Ok(CartView {
        cart_id: cart.uid,
        user_id: cart.user_id,
        is_paid: cart.is_paid,
        coupon_code: coupon.map(|c| c.code),
        items,
        subtotal: breakdown.subtotal,
        discount: breakdown.discount,
        total: breakdown.total,
    })
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the user's unpaid cart, creating one if absent.
    #[instrument(skip(self))]
    pub async fn get_or_create_active_cart(&self, user_id: Uuid) -> Result<CartModel, ServiceError> {
        if let Some(cart) = find_active_cart(&*self.db, user_id).await? {
            return Ok(cart);
        }

        let now = Utc::now();
        let inserted = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            uid: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            is_paid: Set(false),
            coupon_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        // A concurrent request created the cart first; uq_carts_user_unpaid kept ours out.
        let cart = match inserted {
            Ok(cart) => cart,
            Err(err) if is_unique_violation(&err) => {
                return find_active_cart(&*self.db, user_id).await?.ok_or_else(|| {
                    ServiceError::Conflict(format!("Cart for user {} changed concurrently", user_id))
                });
            }
            Err(err) => return Err(err.into()),
        };

        self.event_sender.send_or_log(Event::CartCreated {
            cart_id: cart.uid,
            user_id,
        });
        info!(cart_id = %cart.uid, %user_id, "Created cart");
        Ok(cart)
    }

    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create_active_cart(user_id).await?;
        build_view(&*self.db, &cart).await
    }

    /// Adds a new line. Repeated adds of one product create separate lines;
    /// quantities are changed through `update_item`.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddCartItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
        let cart = self.get_or_create_active_cart(user_id).await?;

        let product = product::Entity::find_by_id(input.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;
        inventory_guard::ensure_purchasable(&product, input.quantity)?;

        let now = Utc::now();
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product.id),
            quantity: Set(input.quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;
        self.touch(cart.id).await?;

        self.event_sender.send_or_log(Event::CartItemAdded {
            cart_id: cart.uid,
            product_id: product.id,
            quantity: input.quantity,
        });
        info!(cart_id = %cart.uid, product_id = %product.id, quantity = input.quantity, "Added item to cart");

        build_view(&*self.db, &cart).await
    }

    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        input: UpdateCartItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
        let (cart, item) = self.owned_item(user_id, item_id).await?;

        let product = product::Entity::find_by_id(item.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;
        inventory_guard::ensure_purchasable(&product, input.quantity)?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(input.quantity);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        self.touch(cart.id).await?;

        self.event_sender.send_or_log(Event::CartItemUpdated {
            cart_id: cart.uid,
            item_id,
            quantity: input.quantity,
        });

        build_view(&*self.db, &cart).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView, ServiceError> {
        let (cart, item) = self.owned_item(user_id, item_id).await?;

        CartItem::delete_by_id(item.id).exec(&*self.db).await?;
        self.touch(cart.id).await?;

        self.event_sender.send_or_log(Event::CartItemRemoved {
            cart_id: cart.uid,
            item_id,
        });

        build_view(&*self.db, &cart).await
    }

    /// Attaches a coupon by code, or detaches it when no code is given.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        user_id: Uuid,
        input: ApplyCouponInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
        let cart = self.get_or_create_active_cart(user_id).await?;
        let coupon = resolve_optional_coupon(&*self.db, input.coupon_code.as_deref()).await?;

        let mut active: cart::ActiveModel = cart.into();
        active.coupon_id = Set(coupon.as_ref().map(|c| c.id));
        active.updated_at = Set(Utc::now());
        let cart = active.update(&*self.db).await?;

        self.event_sender.send_or_log(Event::CouponApplied {
            cart_id: cart.uid,
            coupon_code: coupon.map(|c| c.code),
        });

        build_view(&*self.db, &cart).await
    }

    /// Unpaid carts across all users, oldest first.
    pub async fn list_unpaid_carts(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CartView>, u64), ServiceError> {
        let paginator = Cart::find()
            .filter(cart::Column::IsPaid.eq(false))
            .order_by_asc(cart::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let carts = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut views = Vec::with_capacity(carts.len());
        for cart in &carts {
            views.push(build_view(&*self.db, cart).await?);
        }
        Ok((views, total))
    }

    pub async fn get_cart_by_uid(&self, cart_uid: Uuid) -> Result<CartView, ServiceError> {
        let cart = find_unpaid_by_uid(&*self.db, cart_uid).await?;
        build_view(&*self.db, &cart).await
    }

    /// Replaces the items and coupon of an unpaid cart in one transaction.
    #[instrument(skip(self, input), fields(items = input.items.len()))]
    pub async fn replace_cart(
        &self,
        cart_uid: Uuid,
        input: ReplaceCartInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
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

        let cart = find_unpaid_by_uid(&txn, cart_uid).await?;
        let products =
            inventory_guard::load_products(&txn, requests.iter().map(|r| r.product_id)).await?;
        inventory_guard::ensure_available(&products, &requests)?;
        let coupon = resolve_optional_coupon(&txn, input.coupon_code.as_deref()).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let now = Utc::now();
        for request in &requests {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(request.product_id),
                quantity: Set(request.quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        let mut active: cart::ActiveModel = cart.into();
        active.coupon_id = Set(coupon.as_ref().map(|c| c.id));
        active.updated_at = Set(now);
        let cart = active.update(&txn).await?;

        let view = build_view(&txn, &cart).await?;
        txn.commit().await?;

        info!(cart_id = %cart_uid, items = view.items.len(), "Replaced cart contents");
        Ok(view)
    }

    /// Resolves an item that belongs to the caller's unpaid cart. Anything
    /// else is reported as not found.
    async fn owned_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<(CartModel, cart_item::Model), ServiceError> {
        let not_found = || ServiceError::NotFound(format!("Cart item {} not found", item_id));

        let item = CartItem::find_by_id(item_id)
            .one(&*self.db)
            .await?
            .ok_or_else(not_found)?;

        let cart = Cart::find_by_id(item.cart_id)
            .one(&*self.db)
            .await?
            .filter(|c| c.user_id == user_id && !c.is_paid)
            .ok_or_else(not_found)?;

        Ok((cart, item))
    }

    async fn touch(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        Cart::update_many()
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
