//! Support ticket workflow.
//!
//! Tickets move `open -> in_progress -> resolved -> closed`. Claiming an open
//! ticket is first come, first served, just like claiming an order for
//! processing. `resolved_at` is set exactly while a ticket is resolved or
//! closed, whichever operation moved it there.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use parts_crm_core::{OrderId, TicketId, TicketPriority, TicketStatus, TransitionPolicy, UserId};

use super::access::{active_staff, in_tenant, require_admin, require_staff};
use crate::db::{NewTicket, RecordStore, TicketFilter, TicketState};
use crate::error::AppError;
use crate::models::{Principal, Ticket};

/// A new ticket as submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketDraft {
    #[serde(default)]
    pub order_id: Option<OrderId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TicketPriority,
}

/// Fields of a ticket to change. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketPatch {
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub assigned_to: Option<UserId>,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
}

/// Ticket operations for one request.
pub struct TicketWorkflow<'a, S> {
    store: &'a S,
    policy: TransitionPolicy,
}

impl<'a, S: RecordStore> TicketWorkflow<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, policy: TransitionPolicy) -> Self {
        Self { store, policy }
    }

    async fn load(&self, principal: &Principal, id: TicketId) -> Result<Ticket, AppError> {
        in_tenant(principal, self.store.get_ticket(id).await?, "ticket", id)
    }

    fn changed_concurrently(id: TicketId) -> AppError {
        AppError::Conflict(format!(
            "ticket {id} was changed by another request, reload and retry"
        ))
    }

    /// Open a ticket, optionally linked to an order of the same tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for a blank title and
    /// [`AppError::NotFound`] for an unknown or foreign order.
    #[instrument(skip(self, principal, draft), fields(user_id = %principal.user_id))]
    pub async fn create_ticket(
        &self,
        principal: &Principal,
        draft: TicketDraft,
    ) -> Result<Ticket, AppError> {
        require_staff(principal)?;

        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation("ticket title is required".to_string()));
        }
        if let Some(order_id) = draft.order_id {
            in_tenant(
                principal,
                self.store.get_order(order_id).await?,
                "order",
                order_id,
            )?;
        }

        let ticket = self
            .store
            .create_ticket(NewTicket {
                org_id: principal.org_id,
                user_id: principal.user_id,
                order_id: draft.order_id,
                title,
                description: draft.description.trim().to_string(),
                priority: draft.priority,
            })
            .await?;

        info!(ticket_id = %ticket.id, order_id = ?ticket.order_id, "Ticket opened");
        Ok(ticket)
    }

    /// One ticket of the tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the ticket is missing or foreign.
    pub async fn ticket(&self, principal: &Principal, id: TicketId) -> Result<Ticket, AppError> {
        require_staff(principal)?;
        self.load(principal, id).await
    }

    /// Every ticket of the tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is not staff or the store fails.
    pub async fn tickets(&self, principal: &Principal) -> Result<Vec<Ticket>, AppError> {
        require_staff(principal)?;
        Ok(self
            .store
            .list_tickets(TicketFilter {
                org_id: principal.org_id,
                assigned_to: None,
            })
            .await?)
    }

    /// Tickets assigned to the principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is not staff or the store fails.
    pub async fn my_tickets(&self, principal: &Principal) -> Result<Vec<Ticket>, AppError> {
        require_staff(principal)?;
        Ok(self
            .store
            .list_tickets(TicketFilter {
                org_id: principal.org_id,
                assigned_to: Some(principal.user_id),
            })
            .await?)
    }

    /// Take an open, unassigned ticket and start working on it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Conflict`] when someone else holds the ticket and
    /// [`AppError::Validation`] when it is no longer open.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn assign_to_me(&self, principal: &Principal, id: TicketId) -> Result<Ticket, AppError> {
        require_staff(principal)?;
        let ticket = self.load(principal, id).await?;

        match ticket.assigned_to {
            Some(holder) if holder != principal.user_id => {
                warn!(ticket_id = %id, %holder, "Claim on a taken ticket");
                return Err(AppError::Conflict(format!(
                    "ticket already assigned to user {holder}"
                )));
            }
            Some(_) if ticket.status == TicketStatus::InProgress => return Ok(ticket),
            _ => {}
        }
        if ticket.status != TicketStatus::Open {
            return Err(AppError::Validation(format!(
                "ticket {id} is {}; only open tickets can be claimed",
                ticket.status
            )));
        }
        if ticket.assigned_to.is_some() {
            // Already handed to the caller by an admin; just start it.
            let next = Self::next_state(
                &ticket,
                TicketStatus::InProgress,
                ticket.assigned_to,
                ticket.priority,
            );
            return self.write(&ticket, next).await;
        }

        let Some(claimed) = self.store.claim_ticket(id, principal.user_id).await? else {
            let current = self.load(principal, id).await?;
            return Err(match current.assigned_to {
                Some(holder) if holder != principal.user_id => {
                    warn!(ticket_id = %id, %holder, "Lost ticket claim race");
                    AppError::Conflict(format!("ticket already assigned to user {holder}"))
                }
                _ => Self::changed_concurrently(id),
            });
        };

        info!(ticket_id = %id, "Ticket claimed");
        Ok(claimed)
    }

    /// Change status, assignee or priority.
    ///
    /// Assigning someone other than yourself needs admin, and so does taking
    /// a ticket another agent already holds. Status moves follow
    /// the transition policy, and entering `resolved` stamps `resolved_at`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`], [`AppError::Validation`] or
    /// [`AppError::Conflict`] as described above.
    #[instrument(skip(self, principal, patch), fields(user_id = %principal.user_id))]
    pub async fn update_ticket(
        &self,
        principal: &Principal,
        id: TicketId,
        patch: TicketPatch,
    ) -> Result<Ticket, AppError> {
        require_staff(principal)?;
        let ticket = self.load(principal, id).await?;

        if let Some(assignee) = patch.assigned_to
            && ticket.assigned_to != Some(assignee)
        {
            if !principal.is(assignee) {
                require_admin(principal, "assign tickets to someone else")?;
            }
            if let Some(holder) = ticket.assigned_to
                && !principal.is(holder)
                && !principal.role.is_admin()
            {
                warn!(ticket_id = %id, %holder, "Ticket takeover rejected");
                return Err(AppError::Conflict(format!(
                    "ticket already assigned to user {holder}"
                )));
            }
            active_staff(self.store, principal, assignee).await?;
        }

        let status = patch.status.unwrap_or(ticket.status);
        self.policy
            .check_ticket(ticket.status, status)
            .inspect_err(|e| warn!(ticket_id = %id, error = %e, "Ticket transition rejected"))?;

        let next = Self::next_state(
            &ticket,
            status,
            patch.assigned_to.or(ticket.assigned_to),
            patch.priority.unwrap_or(ticket.priority),
        );
        self.write(&ticket, next).await
    }

    /// Mark a ticket resolved and stamp `resolved_at`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] when the ticket cannot move to
    /// `resolved` from its current status.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn resolve_ticket(&self, principal: &Principal, id: TicketId) -> Result<Ticket, AppError> {
        require_staff(principal)?;
        let ticket = self.load(principal, id).await?;
        if ticket.status == TicketStatus::Resolved {
            return Ok(ticket);
        }

        self.policy
            .check_ticket(ticket.status, TicketStatus::Resolved)
            .inspect_err(|e| warn!(ticket_id = %id, error = %e, "Ticket transition rejected"))?;

        let next = Self::next_state(
            &ticket,
            TicketStatus::Resolved,
            ticket.assigned_to,
            ticket.priority,
        );
        self.write(&ticket, next).await
    }

    fn next_state(
        ticket: &Ticket,
        status: TicketStatus,
        assigned_to: Option<UserId>,
        priority: TicketPriority,
    ) -> TicketState {
        let resolved_at = if status.carries_resolution() {
            ticket
                .resolved_at
                .filter(|_| ticket.status.carries_resolution())
                .or_else(|| Some(Utc::now()))
        } else {
            None
        };

        TicketState {
            status,
            assigned_to,
            priority,
            resolved_at,
        }
    }

    async fn write(&self, ticket: &Ticket, next: TicketState) -> Result<Ticket, AppError> {
        let updated = self
            .store
            .set_ticket_state(ticket.id, TicketState::of(ticket), next)
            .await?
            .ok_or_else(|| Self::changed_concurrently(ticket.id))?;

        info!(
            ticket_id = %updated.id,
            status = %updated.status,
            assigned_to = ?updated.assigned_to,
            "Ticket updated"
        );
        Ok(updated)
    }
}
