//! Commerce services: carts, orders and gateway settlement.

pub mod cart_service;
pub mod inventory_guard;
pub mod order_service;
pub mod pricing_service;
pub mod settlement_service;

pub use cart_service::CartService;
pub use order_service::OrderService;
pub use settlement_service::SettlementService;
