//! Payment gateway seam: hosted checkout sessions and authoritative payment status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub mod stripe;

pub use stripe::{StripeConfig, StripeGateway};

/// One line on the hosted checkout page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    pub name: String,
    /// Unit price in the smallest currency unit (paise, cents, ...)
    pub unit_amount_minor: i64,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
}

/// Gateway view of a payment attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded,
    Pending,
    Failed,
    Other(String),
}

impl PaymentStatus {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Other(other) => other,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        line_items: &[CheckoutLineItem],
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ServiceError>;

    async fn get_payment_status(&self, reference: &str) -> Result<PaymentStatus, ServiceError>;
}

/// Gateway used when no payment provider is configured; every call fails.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_checkout_session(
        &self,
        _line_items: &[CheckoutLineItem],
        _success_url: &str,
        _cancel_url: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        Err(ServiceError::GatewayUnavailable(
            "no payment provider configured".into(),
        ))
    }

    async fn get_payment_status(&self, _reference: &str) -> Result<PaymentStatus, ServiceError> {
        Err(ServiceError::GatewayUnavailable(
            "no payment provider configured".into(),
        ))
    }
}
