//! Stock validation and reservation.
//!
//! Stock is only ever written through a conditional update
//! (`stock = stock - qty WHERE stock >= qty`), so concurrent checkouts can
//! never drive it negative. Callers run these inside their transaction; a
//! failed reservation aborts that transaction.

use crate::entities::product;
use crate::errors::ServiceError;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

/// Upper bound for a single line, mirrored by the input validators.
pub const MAX_LINE_QUANTITY: i32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Sums quantities per product; the BTreeMap keeps a stable update order.
fn aggregate(items: &[StockRequest]) -> Result<BTreeMap<Uuid, i32>, ServiceError> {
    let mut totals: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in items {
        let total = totals.entry(item.product_id).or_insert(0);
        *total = total.checked_add(item.quantity).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Quantity for product {} is too large",
                item.product_id
            ))
        })?;
    }
    Ok(totals)
}

/// Loads every referenced product, failing on the first unknown id.
pub async fn load_products<C: ConnectionTrait>(
    conn: &C,
    product_ids: impl IntoIterator<Item = Uuid>,
) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
    let ids: Vec<Uuid> = product_ids.into_iter().collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let products: HashMap<Uuid, product::Model> = product::Entity::find()
        .filter(product::Column::Id.is_in(ids.clone()))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    if let Some(missing) = ids.iter().find(|id| !products.contains_key(id)) {
        return Err(ServiceError::NotFound(format!("Product {} not found", missing)));
    }
    Ok(products)
}

/// Checks that a product may be ordered in the requested quantity.
pub fn ensure_purchasable(product: &product::Model, quantity: i32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "Quantity must be at least 1".to_string(),
        ));
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(ServiceError::ValidationError(format!(
            "Quantity cannot exceed {}",
            MAX_LINE_QUANTITY
        )));
    }
    if product.display_only {
        return Err(ServiceError::ProductNotPurchasable(product.name.clone()));
    }
    if quantity > product.stock {
        return Err(ServiceError::insufficient_stock(&product.name, product.stock));
    }
    Ok(())
}

/// Read-only check of a whole request against the loaded products.
pub fn ensure_available(
    products: &HashMap<Uuid, product::Model>,
    items: &[StockRequest],
) -> Result<(), ServiceError> {
    for (product_id, quantity) in aggregate(items)? {
        let product = products
            .get(&product_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        ensure_purchasable(product, quantity)?;
    }
    Ok(())
}

/// Atomically decrements stock for every item.
pub async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    items: &[StockRequest],
) -> Result<(), ServiceError> {
    for (product_id, quantity) in aggregate(items)? {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            let current = product::Entity::find_by_id(product_id).one(conn).await?;
            return Err(match current {
                Some(p) => {
                    warn!(product_id = %product_id, requested = quantity, available = p.stock, "Stock reservation lost");
                    ServiceError::insufficient_stock(p.name, p.stock)
                }
                None => ServiceError::NotFound(format!("Product {} not found", product_id)),
            });
        }
        debug!(product_id = %product_id, quantity, "Reserved stock");
    }
    Ok(())
}

/// Returns stock for cancelled order lines.
pub async fn release_stock<C: ConnectionTrait>(
    conn: &C,
    items: &[StockRequest],
) -> Result<(), ServiceError> {
    for (product_id, quantity) in aggregate(items)? {
        product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;
        debug!(product_id = %product_id, quantity, "Released stock");
    }
    Ok(())
}
