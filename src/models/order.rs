use crate::models::money::order_total;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Payment progress of an order, mirrored from `is_paid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Paid,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentState::Pending),
            "paid" => Some(PaymentState::Paid),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchased line, frozen at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    #[schema(value_type = String, example = "100.00")]
    pub unit_price: Decimal,
    pub quantity: u32,
}

/// A buyer's purchase attempt and its payment/delivery progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    #[schema(value_type = String, example = "200.00")]
    pub total_price: Decimal,
    pub currency: String,
    pub payment_reference: String,
    pub payment_status: PaymentState,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds an unpaid, undelivered order; the total is computed once here.
    pub fn new_pending(
        user_id: Uuid,
        items: Vec<OrderItem>,
        currency: impl Into<String>,
        payment_reference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let total_price = order_total(&items);
        Self {
            id: Uuid::new_v4(),
            user_id,
            items,
            total_price,
            currency: currency.into(),
            payment_reference: payment_reference.into(),
            payment_status: PaymentState::Pending,
            is_paid: false,
            paid_at: None,
            is_delivered: false,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies pending → paid. Returns false when the order was already paid.
    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_paid {
            return false;
        }
        self.is_paid = true;
        self.payment_status = PaymentState::Paid;
        self.paid_at = Some(at.max(self.created_at));
        self.updated_at = at;
        true
    }

    /// Applies → delivered. Returns false when the order was already delivered.
    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_delivered {
            return false;
        }
        self.is_delivered = true;
        self.delivered_at = Some(at);
        self.updated_at = at;
        true
    }
}

/// Owner fields attached to orders in the administrative listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OwnerSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithOwner {
    #[serde(flatten)]
    pub order: Order,
    /// `None` when the owning account no longer exists
    pub user: Option<OwnerSummary>,
}
