//! Gateway settlement of carts.
//!
//! A cart is paid through Paystack and reconciled by whichever arrives first:
//! the customer's redirect back to the callback URL or the signed
//! `charge.success` webhook. Both paths end in [`SettlementService::settle_cart`],
//! which is idempotent on the gateway reference.

use crate::{
    auth::{AuthUser, Capability},
    entities::{user, CartModel, OrderStatus, PaymentStatus, User},
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    notifications::{EmailTemplate, NotificationDispatcher},
    payments::{
        signature, ChargeData, InitializeRequest, PaymentGateway, PaymentMetadata, WebhookEvent,
        CHARGE_SUCCESS_EVENT,
    },
    services::commerce::{
        cart_service::{self, CartLine},
        inventory_guard::{self, StockRequest},
        order_service::{self, OrderDraft},
        pricing_service,
    },
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const GATEWAY_PAYMENT_MODE: &str = "Paystack";

/// Facts reported by the gateway for one successful charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleCartCommand {
    pub cart_uid: Uuid,
    pub purchaser_email: String,
    pub reported_amount_minor: i64,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub cart_id: Uuid,
    pub reference: String,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Settled(SettlementReceipt),
    /// The reference was already settled by the other path.
    AlreadyProcessed { reference: String },
    /// A webhook event this service does not act on.
    Ignored { event: String },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InitiatePaymentInput {
    /// Cart `uid`; defaults to the caller's active cart.
    pub cart_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentInitiation {
    pub authorization_url: String,
    pub reference: String,
    pub cart_id: Uuid,
    pub amount_minor: i64,
}

fn purchaser_email(charge: &ChargeData) -> Result<String, ServiceError> {
    charge
        .customer_email()
        .map(str::to_string)
        .ok_or_else(|| ServiceError::ValidationError("Missing customer email".to_string()))
}

fn cart_uid(charge: &ChargeData) -> Result<Uuid, ServiceError> {
    let raw = charge
        .metadata()
        .cart_id
        .ok_or_else(|| ServiceError::ValidationError("Missing cart id in metadata".to_string()))?;
    Uuid::parse_str(raw.trim())
        .map_err(|_| ServiceError::ValidationError(format!("Invalid cart id '{}'", raw)))
}

fn command_from_charge(charge: &ChargeData) -> Result<SettleCartCommand, ServiceError> {
    if charge.reference.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "Missing payment reference".to_string(),
        ));
    }
    Ok(SettleCartCommand {
        cart_uid: cart_uid(charge)?,
        purchaser_email: purchaser_email(charge)?,
        reported_amount_minor: charge.amount,
        reference: charge.reference.trim().to_string(),
    })
}

#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationDispatcher,
    webhook_secret: Option<String>,
    callback_url: String,
}

impl SettlementService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationDispatcher,
        webhook_secret: Option<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            notifications,
            webhook_secret: webhook_secret.filter(|s| !s.trim().is_empty()),
            callback_url: callback_url.into(),
        }
    }

    /// Prices a cart and opens a gateway transaction for it.
    #[instrument(skip(self, caller, input), fields(user_id = %caller.user_id))]
    pub async fn initiate_payment(
        &self,
        caller: &AuthUser,
        input: InitiatePaymentInput,
    ) -> Result<PaymentInitiation, ServiceError> {
        let db = &*self.db;
        let cart: CartModel = match input.cart_id {
            Some(uid) => {
                let cart = cart_service::find_unpaid_by_uid(db, uid).await?;
                if cart.user_id != caller.user_id && !caller.can(Capability::PayForAnyCart) {
                    return Err(ServiceError::Forbidden(
                        "Cart belongs to another user".to_string(),
                    ));
                }
                cart
            }
            None => cart_service::find_active_cart(db, caller.user_id)
                .await?
                .ok_or(ServiceError::EmptyCart)?,
        };

        let owner = User::find_by_id(cart.user_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound(cart.user_id.to_string()))?;

        let lines = cart_service::load_lines(db, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let products: HashMap<_, _> = lines
            .iter()
            .map(|l| (l.product.id, l.product.clone()))
            .collect();
        let requests: Vec<StockRequest> = lines.iter().map(CartLine::stock_request).collect();
        inventory_guard::ensure_available(&products, &requests)?;

        let coupon = cart_service::load_coupon(db, cart.coupon_id).await?;
        let breakdown = cart_service::price_cart(&lines, coupon.as_ref());
        if breakdown.total <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Invalid cart total".to_string(),
            ));
        }
        let amount_minor = pricing_service::to_minor_units(breakdown.total)?;

        let summary = lines
            .iter()
            .map(|l| l.product.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let initialized = self
            .gateway
            .initialize(InitializeRequest {
                email: owner.email.clone(),
                amount: amount_minor,
                callback_url: self.callback_url.clone(),
                metadata: PaymentMetadata::for_cart(cart.uid.to_string(), summary),
            })
            .await?;

        info!(cart_id = %cart.uid, reference = %initialized.reference, amount_minor, "Payment initiated");
        self.event_sender.send_or_log(Event::PaymentInitiated {
            cart_id: cart.uid,
            reference: initialized.reference.clone(),
            amount_minor,
        });

        Ok(PaymentInitiation {
            authorization_url: initialized.authorization_url,
            reference: initialized.reference,
            cart_id: cart.uid,
            amount_minor,
        })
    }

    /// Browser redirect path: asks the gateway about the reference, then settles.
    #[instrument(skip(self))]
    pub async fn verify_redirect(&self, reference: &str) -> Result<SettlementOutcome, ServiceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ServiceError::ValidationError(
                "Missing payment reference".to_string(),
            ));
        }
        if order_service::reference_exists(&*self.db, reference).await? {
            return Ok(SettlementOutcome::AlreadyProcessed {
                reference: reference.to_string(),
            });
        }

        let charge = self.gateway.verify(reference).await?;
        if !charge.is_successful() {
            return Err(ServiceError::PaymentVerificationFailed(format!(
                "Transaction status is {}",
                charge.status.as_deref().unwrap_or("unknown")
            )));
        }

        let command = command_from_charge(&charge)?;
        self.settle_or_acknowledge(command).await
    }

    /// Webhook path. The signature is checked against the raw body before
    /// anything is parsed.
    #[instrument(skip(self, body, signature_header), fields(body_len = body.len()))]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<SettlementOutcome, ServiceError> {
        signature::ensure_valid(self.webhook_secret.as_deref(), body, signature_header)?;

        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ServiceError::ValidationError(format!("Malformed webhook body: {}", e)))?;
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if event != CHARGE_SUCCESS_EVENT {
            info!(%event, "Ignoring webhook event");
            return Ok(SettlementOutcome::Ignored { event });
        }

        let webhook: WebhookEvent = serde_json::from_value(value)
            .map_err(|e| ServiceError::ValidationError(format!("Malformed charge payload: {}", e)))?;
        let command = command_from_charge(&webhook.data)?;
        self.settle_or_acknowledge(command).await
    }

    async fn settle_or_acknowledge(
        &self,
        command: SettleCartCommand,
    ) -> Result<SettlementOutcome, ServiceError> {
        match self.settle_cart(command).await {
            Ok(receipt) => Ok(SettlementOutcome::Settled(receipt)),
            Err(ServiceError::PaymentAlreadyProcessed(reference)) => {
                info!(%reference, "Payment already settled");
                Ok(SettlementOutcome::AlreadyProcessed { reference })
            }
            Err(e) => Err(e),
        }
    }

    /// Converts a paid cart into a confirmed order in one transaction.
    ///
    /// Fails with `PaymentAlreadyProcessed` when the reference has been seen,
    /// `AmountMismatch` when the gateway total differs from the cart total,
    /// and stock or coupon errors as cart pricing would.
    #[instrument(skip(self, command), fields(cart_uid = %command.cart_uid, reference = %command.reference))]
    pub async fn settle_cart(
        &self,
        command: SettleCartCommand,
    ) -> Result<SettlementReceipt, ServiceError> {
        let txn = self.db.begin().await?;

        if order_service::reference_exists(&txn, &command.reference).await? {
            return Err(ServiceError::PaymentAlreadyProcessed(command.reference));
        }

        let cart = cart_service::find_unpaid_by_uid(&txn, command.cart_uid).await?;

        let email = command.purchaser_email.trim();
        let customer = User::find()
            .filter(user::Column::Email.eq(email))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound(email.to_string()))?;

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
        let draft = OrderDraft::from_cart_lines(
            customer.id,
            &lines,
            coupon.clone(),
            GATEWAY_PAYMENT_MODE,
            OrderStatus::Confirmed,
            PaymentStatus::Completed,
        );

        let expected = pricing_service::round_money(draft.total());
        let reported = pricing_service::from_minor_units(command.reported_amount_minor);
        if expected != reported {
            warn!(%expected, %reported, "Gateway amount does not match cart total");
            return Err(ServiceError::AmountMismatch { expected, reported });
        }

        cart_service::claim_cart(&txn, &cart).await?;
        let materialized = order_service::materialize_order(&txn, &draft).await?;

        if let Err(e) =
            order_service::record_completed_payment(&txn, &materialized.order, &command.reference)
                .await
        {
            return Err(match e {
                ServiceError::DatabaseError(db) if is_unique_violation(&db) => {
                    ServiceError::PaymentAlreadyProcessed(command.reference)
                }
                other => other,
            });
        }

        cart_service::clear_cart(&txn, cart.id).await?;
        txn.commit().await?;

        let order = &materialized.order;
        info!(order_id = %order.id, total = %order.total_amount, "Cart settled");

        self.event_sender.send_or_log(Event::CartSettled {
            cart_id: cart.uid,
            order_id: order.id,
            reference: command.reference.clone(),
        });
        self.event_sender.send_or_log(Event::OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            payment_mode: order.payment_mode.clone(),
        });
        self.event_sender.send_or_log(Event::PaymentRecorded {
            order_id: order.id,
            reference: Some(command.reference.clone()),
            status: PaymentStatus::Completed.to_string(),
        });

        let summary =
            order_service::summarize(&materialized, &customer, coupon.map(|c| c.code));
        self.notifications
            .notify(EmailTemplate::OrderConfirmation, &customer.email, &summary);

        Ok(SettlementReceipt {
            order_id: order.id,
            order_number: order.order_number.clone(),
            cart_id: cart.uid,
            reference: command.reference,
            total_amount: order.total_amount,
            status: order.status,
            payment_status: order.payment_status,
        })
    }
}
