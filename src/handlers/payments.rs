//! Gateway payment endpoints.
//!
//! `/initiate` is authenticated. `/callback` and `/webhook` are hit by the
//! customer's browser and by the gateway, so they carry no bearer token; the
//! webhook is authenticated by its HMAC signature instead.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    auth::{AuthRouterExt, AuthUser, Capability},
    errors::ServiceError,
    handlers::{common::JsonOrDefault, AppState},
    payments::signature::SIGNATURE_HEADER,
    services::commerce::settlement_service::{
        InitiatePaymentInput, PaymentInitiation, SettlementOutcome,
    },
    ApiResponse, ApiResult,
};

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub reference: Option<String>,
}

pub fn payment_routes() -> Router<AppState> {
    let authenticated = Router::new()
        .route("/initiate", post(initiate_payment))
        .with_capability(Capability::InitiatePayment);

    Router::new()
        .route("/callback", get(payment_callback))
        .route("/webhook", post(payment_webhook))
        .merge(authenticated)
}

/// Opens a gateway transaction for a cart and returns the checkout URL.
pub async fn initiate_payment(
    State(state): State<AppState>,
    user: AuthUser,
    JsonOrDefault(input): JsonOrDefault<InitiatePaymentInput>,
) -> ApiResult<PaymentInitiation> {
    let initiation = state
        .services
        .settlement
        .initiate_payment(&user, input)
        .await?;
    Ok(Json(ApiResponse::success(initiation)))
}

/// Redirect target after checkout. Verifies the reference with the gateway.
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<SettlementOutcome> {
    let reference = query
        .reference
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ServiceError::ValidationError("Missing payment reference".to_string()))?;
    let outcome = state.services.settlement.verify_redirect(&reference).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Gateway webhook. The raw body is needed for the signature check.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .services
        .settlement
        .handle_webhook(&body, signature)
        .await?;

    Ok(Json(webhook_ack(&outcome)).into_response())
}

fn webhook_ack(outcome: &SettlementOutcome) -> serde_json::Value {
    match outcome {
        SettlementOutcome::Settled(receipt) => json!({
            "status": "success",
            "order_id": receipt.order_id,
            "order_number": receipt.order_number,
            "reference": receipt.reference,
        }),
        SettlementOutcome::AlreadyProcessed { reference } => {
            info!(%reference, "Acknowledging replayed webhook");
            json!({ "status": "already_processed", "reference": reference })
        }
        SettlementOutcome::Ignored { .. } => json!({ "status": "ignored" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_events_ack_with_plain_status() {
        let ack = webhook_ack(&SettlementOutcome::Ignored {
            event: "transfer.success".into(),
        });
        assert_eq!(ack, json!({ "status": "ignored" }));
    }

    #[test]
    fn replays_are_acknowledged() {
        let ack = webhook_ack(&SettlementOutcome::AlreadyProcessed {
            reference: "T1".into(),
        });
        assert_eq!(ack["status"], "already_processed");
    }
}
