use super::{ChargeData, GatewayError, InitializeRequest, InitializedPayment, PaymentGateway};
use crate::config::AppConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Paystack response envelope: `{ status, message, data }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// Paystack REST client. Every call is bounded by the configured timeout.
#[derive(Clone)]
pub struct PaystackClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl std::fmt::Debug for PaystackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaystackClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PaystackClient {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        if cfg.webhook_secret().is_none() {
            warn!("APP__PAYSTACK_SECRET_KEY is not set; gateway calls and webhooks will be rejected");
        }
        Self::new(
            cfg.paystack_base_url.clone(),
            cfg.paystack_secret_key.clone().unwrap_or_default(),
            cfg.gateway_timeout(),
        )
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Transport(format!(
                "gateway responded with {}",
                status
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        match (envelope.status, envelope.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(GatewayError::InvalidResponse(
                "response is missing data".to_string(),
            )),
            (false, _) => Err(GatewayError::Rejected(envelope.message)),
        }
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Transport("request timed out".to_string())
    } else {
        GatewayError::Transport(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    #[instrument(skip(self, request), fields(amount = request.amount))]
    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<InitializedPayment, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let initialized: InitializedPayment = Self::read_envelope(response).await?;
        debug!(reference = %initialized.reference, "Gateway transaction initialized");
        Ok(initialized)
    }

    #[instrument(skip(self))]
    async fn verify(&self, reference: &str) -> Result<ChargeData, GatewayError> {
        let encoded: String = url::form_urlencoded::byte_serialize(reference.as_bytes()).collect();
        let url = format!("{}/transaction/verify/{}", self.base_url, encoded);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        Self::read_envelope(response).await
    }
}
