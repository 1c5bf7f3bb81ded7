//! Orders and their line items.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use parts_crm_core::{
    AgentType, Email, FulfillmentStatus, OrderId, OrderProductId, OrganizationId, PaymentStatus,
    ProductId, UserId,
};

use super::Transaction;

/// The central aggregate.
///
/// `customer_name`, `customer_email` and `customer_phone` are a snapshot taken
/// at order time. Later edits to the customer's [`super::User`] record do not
/// change them.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: OrderId,
    pub org_id: OrganizationId,
    pub customer_id: UserId,
    pub customer_name: String,
    pub customer_email: Email,
    pub customer_phone: Option<String>,
    pub total_amount: Decimal,
    pub discounted_amount: Option<Decimal>,
    pub shipping_address: String,
    pub sales_agent: Option<UserId>,
    pub processing_agent: Option<UserId>,
    pub followup_agent: Option<UserId>,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub order_tracking: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Current holder of an agent slot.
    #[must_use]
    pub const fn agent(&self, slot: AgentType) -> Option<UserId> {
        match slot {
            AgentType::Sales => self.sales_agent,
            AgentType::Processing => self.processing_agent,
            AgentType::Followup => self.followup_agent,
        }
    }

    /// Amount a card capture charges.
    #[must_use]
    pub fn amount_due(&self) -> Decimal {
        self.discounted_amount.unwrap_or(self.total_amount)
    }
}

/// Line item snapshot of a product at order time.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderProduct {
    pub id: OrderProductId,
    pub order_id: OrderId,
    pub org_id: OrganizationId,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_code: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub procurement_cost: Option<Decimal>,
    pub procurement_source: Option<String>,
}

impl OrderProduct {
    /// Both procurement fields are recorded.
    #[must_use]
    pub const fn is_procured(&self) -> bool {
        self.procurement_cost.is_some() && self.procurement_source.is_some()
    }
}

/// An order with everything hanging off it.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub line_items: Vec<OrderProduct>,
    pub transactions: Vec<Transaction>,
}
