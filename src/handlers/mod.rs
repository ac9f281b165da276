pub mod admin;
pub mod carts;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    notifications::{NotificationDispatcher, Notifier},
    payments::PaymentGateway,
    services::commerce::{CartService, OrderService, SettlementService},
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub settlement: Arc<SettlementService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        cfg: &AppConfig,
    ) -> Self {
        let notifications = NotificationDispatcher::from_config(notifier, cfg);

        let cart = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            notifications.clone(),
        ));
        let settlement = Arc::new(SettlementService::new(
            db_pool,
            event_sender,
            gateway,
            notifications,
            cfg.webhook_secret().map(str::to_string),
            cfg.payment_callback_url(),
        ));

        Self {
            cart,
            orders,
            settlement,
        }
    }
}
