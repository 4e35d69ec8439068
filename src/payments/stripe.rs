use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{CheckoutLineItem, CheckoutSession, PaymentGateway, PaymentStatus};
use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub currency: String,
    pub timeout: Duration,
}

impl StripeConfig {
    /// Returns `None` when no secret key is configured.
    pub fn from_app_config(cfg: &AppConfig) -> Option<Self> {
        let secret_key = cfg
            .stripe_secret_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())?;

        Some(Self {
            secret_key: secret_key.to_string(),
            api_base: cfg.stripe_api_base.trim_end_matches('/').to_string(),
            currency: cfg.payment_currency.to_ascii_lowercase(),
            timeout: cfg.gateway_timeout(),
        })
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Hosted-checkout adapter over the Stripe REST API
#[derive(Clone, Debug)]
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    status: String,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    fn checkout_form(
        &self,
        line_items: &[CheckoutLineItem],
        success_url: &str,
        cancel_url: &str,
    ) -> Vec<(String, String)> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
        ];

        for (i, item) in line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            params.push((
                format!("{}[price_data][currency]", prefix),
                self.config.currency.clone(),
            ));
            params.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            params.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount_minor.to_string(),
            ));
            params.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        params
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, ServiceError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, body = %error_text, "Stripe lookup failed");
            return Err(ServiceError::GatewayUnavailable(format!(
                "Stripe returned {}",
                status
            )));
        }

        response.json::<T>().await.map(Some).map_err(|e| {
            ServiceError::GatewayUnavailable(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::GatewayUnavailable("Stripe request timed out".into())
    } else {
        ServiceError::GatewayUnavailable(format!("Stripe API error: {}", e))
    }
}

/// Stripe object ids are a `prefix_` followed by alphanumerics, so they are
/// safe to place in a single path segment.
fn is_object_id(reference: &str) -> bool {
    !reference.is_empty()
        && reference.len() <= 255
        && reference
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn session_status(session: &SessionResponse) -> PaymentStatus {
    match (session.payment_status.as_deref(), session.status.as_deref()) {
        (Some("paid") | Some("no_payment_required"), _) => PaymentStatus::Succeeded,
        (_, Some("expired")) => PaymentStatus::Failed,
        (Some("unpaid"), _) => PaymentStatus::Pending,
        (Some(other), _) => PaymentStatus::Other(other.to_string()),
        (None, _) => PaymentStatus::Pending,
    }
}

fn intent_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Succeeded,
        "canceled" => PaymentStatus::Failed,
        "processing" | "requires_payment_method" | "requires_confirmation"
        | "requires_action" | "requires_capture" => PaymentStatus::Pending,
        other => PaymentStatus::Other(other.to_string()),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, line_items, success_url, cancel_url), fields(lines = line_items.len()))]
    async fn create_checkout_session(
        &self,
        line_items: &[CheckoutLineItem],
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let params = self.checkout_form(line_items, success_url, cancel_url);

        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, body = %error_text, "Stripe rejected checkout session");
            return Err(ServiceError::GatewayUnavailable(format!(
                "Stripe returned {}",
                status
            )));
        }

        let session: SessionResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayUnavailable(format!("Failed to parse Stripe response: {}", e))
        })?;

        info!(session_id = %session.id, "Checkout session created");
        Ok(CheckoutSession {
            session_id: session.id,
        })
    }

    #[instrument(skip(self))]
    async fn get_payment_status(&self, reference: &str) -> Result<PaymentStatus, ServiceError> {
        let unknown = || PaymentStatus::Other("not_found".to_string());

        if !is_object_id(reference) {
            warn!("refusing to look up a malformed payment reference");
            return Err(ServiceError::ValidationError(
                "Invalid payment reference".to_string(),
            ));
        }

        if reference.starts_with("pi_") {
            let url = self.url(&format!("/v1/payment_intents/{}", reference));
            return Ok(self
                .fetch::<PaymentIntentResponse>(&url)
                .await?
                .map(|intent| intent_status(&intent.status))
                .unwrap_or_else(unknown));
        }

        let url = self.url(&format!("/v1/checkout/sessions/{}", reference));
        Ok(self
            .fetch::<SessionResponse>(&url)
            .await?
            .map(|session| session_status(&session))
            .unwrap_or_else(unknown))
    }
}
