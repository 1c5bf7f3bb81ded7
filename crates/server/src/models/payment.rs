//! Payment receipts and tokenized cards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use parts_crm_core::{
    OrderId, OrganizationId, SavedCardId, TransactionId, TransactionStatus, UserId,
};

/// Append-only record of one captured payment.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: TransactionId,
    pub order_id: OrderId,
    pub org_id: OrganizationId,
    /// Agent who ran the capture.
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub payment_method: String,
    pub gateway_transaction_id: Option<String>,
    pub auth_code: Option<String>,
    pub response_code: Option<String>,
    /// Masked card identifiers only.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A card kept on file as a gateway token. The PAN and CVV are never stored.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SavedCard {
    pub id: SavedCardId,
    pub org_id: OrganizationId,
    pub customer_id: UserId,
    #[serde(skip_serializing)]
    pub gateway_token: String,
    pub last4: String,
    pub brand: Option<String>,
    pub created_at: DateTime<Utc>,
}
