//! Customer notifications.
//!
//! Delivery is fire-and-forget: `dispatch` spawns the send with a bounded
//! timeout and only logs failures, so a slow or broken mail relay never
//! affects the order that triggered it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError>;
}

/// Writes outgoing mail to the log. Used when no relay is configured.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    from: String,
}

impl LogNotifier {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        info!(
            from = %self.from,
            to = %message.to,
            subject = %message.subject,
            "Email queued"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLineSummary {
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// What the templates need to know about an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub order_number: String,
    pub customer_name: String,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_status: String,
    pub coupon_code: Option<String>,
    pub items: Vec<OrderLineSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    OrderConfirmation,
    OrderStatusUpdate,
}

impl EmailTemplate {
    pub fn render(&self, to: &str, order: &OrderSummary, currency: &str) -> EmailMessage {
        let (subject, body) = match self {
            EmailTemplate::OrderConfirmation => (
                format!("Order Confirmation: {}", order.order_number),
                order_confirmation_body(order, currency),
            ),
            EmailTemplate::OrderStatusUpdate => (
                format!("Order Update: {}", order.order_number),
                format!(
                    "Dear {},\n\nYour order {} is now {}.\nPayment Status: {}\n",
                    order.customer_name, order.order_number, order.status, order.payment_status
                ),
            ),
        };

        EmailMessage {
            to: to.to_string(),
            subject,
            body,
        }
    }
}

fn order_confirmation_body(order: &OrderSummary, currency: &str) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Dear {},\n", order.customer_name);
    let _ = writeln!(body, "Thank you for your order! Here are the details:\n");
    let _ = writeln!(body, "Order ID: {}", order.order_number);
    let _ = writeln!(
        body,
        "Total Amount: {} {:.2}",
        currency, order.total_amount
    );
    let _ = writeln!(body, "Status: {}", order.status);
    let _ = writeln!(body, "Payment Status: {}", order.payment_status);
    let _ = writeln!(
        body,
        "Coupon Applied: {}",
        order.coupon_code.as_deref().unwrap_or("None")
    );
    let _ = writeln!(body, "\nItems:");
    for item in &order.items {
        let _ = writeln!(
            body,
            "- {} (Qty: {}, Price: {} {:.2})",
            item.product_name, item.quantity, currency, item.unit_price
        );
    }
    let _ = writeln!(body, "\nWe will notify you when your order ships.");
    body
}

/// Sends on a background task bounded by `timeout`.
pub fn dispatch(notifier: Arc<dyn Notifier>, message: EmailMessage, timeout: Duration) {
    tokio::spawn(async move {
        let subject = message.subject.clone();
        let outcome = match tokio::time::timeout(timeout, notifier.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout(timeout)),
        };
        if let Err(e) = outcome {
            warn!(%subject, "Notification not delivered: {}", e);
        }
    });
}

/// Renders templates and dispatches them with the configured timeout.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    currency: String,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration, currency: impl Into<String>) -> Self {
        Self {
            notifier,
            timeout,
            currency: currency.into(),
        }
    }

    pub fn from_config(notifier: Arc<dyn Notifier>, cfg: &crate::config::AppConfig) -> Self {
        Self::new(notifier, cfg.notification_timeout(), cfg.currency_label.clone())
    }

    pub fn notify(&self, template: EmailTemplate, to: &str, order: &OrderSummary) {
        let message = template.render(to, order, &self.currency);
        dispatch(self.notifier.clone(), message, self.timeout);
    }
}
