//! Payment gateway boundary.
//!
//! The gateway is reached through two calls, `initialize` and `verify`, and
//! may push signed webhook events. Amounts on this boundary are integer minor
//! units.

pub mod paystack;
pub mod signature;

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use paystack::PaystackClient;

pub const CHARGE_SUCCESS_EVENT: &str = "charge.success";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    pub display_name: String,
    pub variable_name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

impl PaymentMetadata {
    pub fn for_cart(cart_id: impl Into<String>, item_summary: impl Into<String>) -> Self {
        Self {
            cart_id: Some(cart_id.into()),
            custom_fields: vec![CustomField {
                display_name: "Cart Items".to_string(),
                variable_name: "cart_items".to_string(),
                value: item_summary.into(),
            }],
        }
    }

    /// Gateways echo metadata back either as an object or as a JSON string.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(raw) => serde_json::from_str::<Value>(raw)
                .map(|v| Self::from_value(&v))
                .unwrap_or_default(),
            Value::Object(map) => Self {
                cart_id: map.get("cart_id").and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
                custom_fields: map
                    .get("custom_fields")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default(),
            },
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    /// Minor units
    pub amount: i64,
    pub callback_url: String,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub reference: String,
    #[serde(default)]
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub email: Option<String>,
}

/// Transaction payload shared by verify responses and webhook events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChargeData {
    pub reference: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Minor units
    pub amount: i64,
    #[serde(default)]
    pub customer: Customer,
    #[serde(default)]
    pub metadata: Value,
}

impl ChargeData {
    pub fn is_successful(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    pub fn metadata(&self) -> PaymentMetadata {
        PaymentMetadata::from_value(&self.metadata)
    }

    pub fn customer_email(&self) -> Option<&str> {
        self.customer
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: ChargeData,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The call never produced a usable answer (timeout, connection, 5xx).
    #[error("gateway transport error: {0}")]
    Transport(String),
    /// The gateway answered and refused the request.
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(msg) => ServiceError::PaymentVerificationFailed(msg),
            GatewayError::Transport(msg) | GatewayError::InvalidResponse(msg) => {
                ServiceError::GatewayUnavailable(msg)
            }
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: InitializeRequest)
        -> Result<InitializedPayment, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<ChargeData, GatewayError>;
}
