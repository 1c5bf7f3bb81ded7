//! Support tickets.

use chrono::{DateTime, Utc};
use serde::Serialize;

use parts_crm_core::{OrderId, OrganizationId, TicketId, TicketPriority, TicketStatus, UserId};

/// A support or follow-up case.
///
/// `resolved_at` is set exactly when `status` is `resolved` or `closed`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Ticket {
    pub id: TicketId,
    pub org_id: OrganizationId,
    /// Creator.
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub assigned_to: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
