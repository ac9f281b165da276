use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle for publishing domain events onto the in-process channel.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Publishes without waiting; a full or closed channel is only logged.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping domain event: {}", e);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CartCreated {
        cart_id: Uuid,
        user_id: Uuid,
    },
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemUpdated {
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CouponApplied {
        cart_id: Uuid,
        coupon_code: Option<String>,
    },
    PaymentInitiated {
        cart_id: Uuid,
        reference: String,
        amount_minor: i64,
    },
    CartSettled {
        cart_id: Uuid,
        order_id: Uuid,
        reference: String,
    },
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
        payment_mode: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentRecorded {
        order_id: Uuid,
        reference: Option<String>,
        status: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartCreated { .. } => "cart.created",
            Event::CartItemAdded { .. } => "cart.item_added",
            Event::CartItemUpdated { .. } => "cart.item_updated",
            Event::CartItemRemoved { .. } => "cart.item_removed",
            Event::CouponApplied { .. } => "cart.coupon_applied",
            Event::PaymentInitiated { .. } => "payment.initiated",
            Event::CartSettled { .. } => "cart.settled",
            Event::OrderCreated { .. } => "order.created",
            Event::OrderStatusChanged { .. } => "order.status_changed",
            Event::PaymentRecorded { .. } => "payment.recorded",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CartSettled {
                cart_id,
                order_id,
                reference,
            } => {
                info!(event = event.name(), %cart_id, %order_id, %reference, "Cart settled");
            }
            Event::OrderCreated {
                order_id,
                total_amount,
                payment_mode,
                ..
            } => {
                info!(event = event.name(), %order_id, %total_amount, %payment_mode, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(event = event.name(), %order_id, %old_status, %new_status, "Order status changed");
            }
            other => {
                debug!(event = other.name(), payload = ?other, "Domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}
