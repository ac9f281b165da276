//! Cart and order pricing.
//!
//! All amounts are exact decimals rounded to two fraction digits. Coupon
//! discounts are a fixed amount subtracted from the subtotal and the result
//! never drops below zero.

use crate::{entities::order_item, errors::ServiceError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use uuid::Uuid;

/// One priced line: a product, the unit price in effect, and a quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    /// Discount actually applied, capped at the subtotal.
    pub discount: Decimal,
    pub total: Decimal,
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}

/// Subtracts a fixed coupon discount, flooring at zero.
pub fn apply_discount(subtotal: Decimal, discount: Option<Decimal>) -> Decimal {
    let discount = discount.unwrap_or(Decimal::ZERO).max(Decimal::ZERO);
    round_money((subtotal - discount).max(Decimal::ZERO))
}

/// Prices a set of lines and applies an optional coupon discount.
pub fn price_lines<I>(lines: I, coupon_discount: Option<Decimal>) -> PriceBreakdown
where
    I: IntoIterator<Item = PricingLine>,
{
    let lines: Vec<PricedLine> = lines
        .into_iter()
        .map(|line| PricedLine {
            line_total: line_total(line.unit_price, line.quantity),
            product_id: line.product_id,
            product_name: line.product_name,
            unit_price: line.unit_price,
            quantity: line.quantity,
        })
        .collect();

    let subtotal = round_money(lines.iter().map(|l| l.line_total).sum());
    let total = apply_discount(subtotal, coupon_discount);

    PriceBreakdown {
        lines,
        subtotal,
        discount: subtotal - total,
        total,
    }
}

/// Total of an already persisted order, from its snapshot prices.
pub fn order_total(items: &[order_item::Model], coupon_discount: Option<Decimal>) -> Decimal {
    let subtotal: Decimal = items
        .iter()
        .map(|item| line_total(item.product_price, item.quantity))
        .sum();
    apply_discount(subtotal, coupon_discount)
}

/// Converts an amount to gateway minor units (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (round_money(amount) * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("Amount {} is out of range", amount)))
}

/// Converts gateway minor units back to a two-digit decimal amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
