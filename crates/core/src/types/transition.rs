//! Status transition tables.
//!
//! Every status write in the engine is validated against a [`TransitionPolicy`]
//! before it reaches the store. Writing the current status again is always
//! accepted, so repeated updates are idempotent.
//!
//! ```text
//! payment      unpaid -> partial | paid
//!              partial -> paid | refunded
//!              paid -> refunded
//!
//! fulfillment  pending -> cancelled              (processing only via agent claim)
//!              processing -> cancelled           (shipped only via procurement gate)
//!              shipped -> delivered | cancelled
//!              delivered -> closed | cancelled
//!
//! ticket       open -> in_progress -> resolved -> closed
//! ```
//!
//! The permissive policy accepts any target. Shipping stays gated by procurement
//! completeness under both policies; that check lives in the engine.

use serde::{Deserialize, Serialize};

use super::status::{FulfillmentStatus, PaymentStatus, TicketStatus};

/// Which transition table the engine enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Only the documented lifecycle edges are allowed.
    #[default]
    Strict,
    /// Any status may be written directly.
    Permissive,
}

/// A status change was refused by the active policy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{axis} status cannot change from {from} to {to}")]
pub struct TransitionRejected {
    /// Which status axis was being changed.
    pub axis: &'static str,
    /// Current status.
    pub from: String,
    /// Requested status.
    pub to: String,
}

impl TransitionRejected {
    fn new(axis: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self {
            axis,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl TransitionPolicy {
    /// Validate a payment status change.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionRejected`] when the edge is not in the table.
    pub fn check_payment(
        self,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<(), TransitionRejected> {
        use PaymentStatus::{Paid, Partial, Refunded, Unpaid};

        let allowed = from == to
            || self == Self::Permissive
            || matches!(
                (from, to),
                (Unpaid, Partial | Paid) | (Partial, Paid | Refunded) | (Paid, Refunded)
            );

        if allowed {
            Ok(())
        } else {
            Err(TransitionRejected::new("payment", from, to))
        }
    }

    /// Validate a direct fulfillment status update.
    ///
    /// Under the strict policy `processing` and `shipped` are never reachable
    /// through a direct update: the first requires a processing agent claim and
    /// the second the procurement gate.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionRejected`] when the edge is not in the table.
    pub fn check_fulfillment(
        self,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<(), TransitionRejected> {
        use FulfillmentStatus::{Cancelled, Closed, Delivered, Pending, Processing, Shipped};

        let allowed = from == to
            || self == Self::Permissive
            || matches!(
                (from, to),
                (Pending | Processing, Cancelled)
                    | (Shipped, Delivered | Cancelled)
                    | (Delivered, Closed | Cancelled)
            );

        if allowed {
            Ok(())
        } else {
            Err(TransitionRejected::new("fulfillment", from, to))
        }
    }

    /// Validate entry into `shipped` through the procurement gate.
    ///
    /// Strict: only from `processing`. Permissive: from anywhere. Line item
    /// completeness is checked separately under both policies.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionRejected`] when the order may not ship from `from`.
    pub fn check_shipment(self, from: FulfillmentStatus) -> Result<(), TransitionRejected> {
        let allowed = matches!(
            from,
            FulfillmentStatus::Processing | FulfillmentStatus::Shipped
        ) || self == Self::Permissive;

        if allowed {
            Ok(())
        } else {
            Err(TransitionRejected::new(
                "fulfillment",
                from,
                FulfillmentStatus::Shipped,
            ))
        }
    }

    /// Validate a ticket status change.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionRejected`] when the edge is not in the table.
    pub fn check_ticket(self, from: TicketStatus, to: TicketStatus) -> Result<(), TransitionRejected> {
        use TicketStatus::{Closed, InProgress, Open, Resolved};

        let allowed = from == to
            || self == Self::Permissive
            || matches!(
                (from, to),
                (Open, InProgress) | (InProgress, Resolved) | (Resolved, Closed)
            );

        if allowed {
            Ok(())
        } else {
            Err(TransitionRejected::new("ticket", from, to))
        }
    }
}

impl std::fmt::Display for TransitionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Permissive => f.write_str("permissive"),
        }
    }
}

impl std::str::FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => Err(format!("invalid transition policy: {other}")),
        }
    }
}
