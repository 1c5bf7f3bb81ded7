//! Order lifecycle engine.
//!
//! Owns every change to an order: intake, payment and fulfillment status,
//! agent slots, procurement and tracking. Status changes are validated against
//! the configured [`TransitionPolicy`] and then written as compare-and-swap
//! updates, so two requests acting on the same order never silently overwrite
//! each other.
//!
//! ```text
//! pending --claim processing--> processing --procurement complete--> shipped
//!    shipped --> delivered --> closed        any non-terminal --> cancelled
//! ```

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use parts_crm_core::{
    AgentType, Email, FulfillmentStatus, OrderId, OrderProductId, PaymentStatus, ProductId,
    TransitionPolicy, UserId, ensure_non_negative, ensure_positive,
};

use super::access::{active_staff, in_tenant, require_admin, require_staff};
use super::catalog::ProductInput;
use crate::db::{
    AgentAssignment, CustomerSnapshot, LineItemProduct, NewLineItem, NewOrder, OrderFilter,
    RecordStore, RepositoryError,
};
use crate::error::AppError;
use crate::models::{Order, OrderDetail, OrderProduct, Principal};

// =============================================================================
// Inputs
// =============================================================================

/// Customer details as typed by the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerInput {
    /// Full name; split into first and last on the first space.
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// One line of a new order. Exactly one of `product_id` and `product` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemInput {
    #[serde(default)]
    pub product_id: Option<ProductId>,
    /// Product to add to the catalog together with the order.
    #[serde(default)]
    pub product: Option<ProductInput>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Everything needed to take an order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDraft {
    pub customer: CustomerInput,
    pub shipping_address: String,
    pub total_amount: Decimal,
    #[serde(default)]
    pub discounted_amount: Option<Decimal>,
    pub line_items: Vec<LineItemInput>,
}

/// Split `"Dana Reyes Ortiz"` into `("Dana", "Reyes Ortiz")`.
///
/// Everything after the first space is the last name.
#[must_use]
pub fn split_name(full: &str) -> (String, String) {
    let full = full.trim();
    match full.split_once(' ') {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (full.to_string(), String::new()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Engine
// =============================================================================

/// Order operations for one request.
pub struct OrderEngine<'a, S> {
    store: &'a S,
    policy: TransitionPolicy,
}

impl<'a, S: RecordStore> OrderEngine<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, policy: TransitionPolicy) -> Self {
        Self { store, policy }
    }

    async fn load(&self, principal: &Principal, id: OrderId) -> Result<Order, AppError> {
        in_tenant(principal, self.store.get_order(id).await?, "order", id)
    }

    fn changed_concurrently(id: OrderId) -> AppError {
        AppError::Conflict(format!(
            "order {id} was changed by another request, reload and retry"
        ))
    }

    // -------------------------------------------------------------------------
    // Intake
    // -------------------------------------------------------------------------

    /// Take a new order.
    ///
    /// The customer is matched by email inside the tenant and created as a
    /// customer user when unknown. Order, line items and inline products are
    /// written together or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for malformed input or a line item
    /// whose product does not exist in the tenant.
    #[instrument(skip(self, principal, draft), fields(user_id = %principal.user_id, org_id = %principal.org_id))]
    pub async fn create_order(
        &self,
        principal: &Principal,
        draft: OrderDraft,
    ) -> Result<OrderDetail, AppError> {
        require_staff(principal)?;
        let new = Self::validate_draft(principal, draft)?;

        let (order, line_items) = self.store.create_order(new).await.map_err(|e| match e {
            RepositoryError::MissingReference(what) => {
                AppError::Validation(format!("{what} does not exist"))
            }
            other => other.into(),
        })?;

        info!(
            order_id = %order.id,
            customer_id = %order.customer_id,
            line_items = line_items.len(),
            "Order created"
        );

        Ok(OrderDetail {
            order,
            line_items,
            transactions: Vec::new(),
        })
    }

    fn validate_draft(principal: &Principal, draft: OrderDraft) -> Result<NewOrder, AppError> {
        if draft.line_items.is_empty() {
            return Err(AppError::Validation(
                "an order needs at least one line item".to_string(),
            ));
        }

        let shipping_address = draft.shipping_address.trim().to_string();
        if shipping_address.is_empty() {
            return Err(AppError::Validation(
                "shipping address is required".to_string(),
            ));
        }

        let total_amount = ensure_positive("total_amount", draft.total_amount)?;
        let discounted_amount = draft
            .discounted_amount
            .map(|d| ensure_non_negative("discounted_amount", d))
            .transpose()?;
        if discounted_amount.is_some_and(|d| d > total_amount) {
            return Err(AppError::Validation(
                "discounted_amount cannot exceed total_amount".to_string(),
            ));
        }

        let email = Email::parse(&draft.customer.email)
            .map_err(|e| AppError::Validation(format!("customer email: {e}")))?;
        let (first_name, last_name) = split_name(&draft.customer.name);
        if first_name.is_empty() {
            return Err(AppError::Validation(
                "customer name is required".to_string(),
            ));
        }

        let mut line_items = Vec::with_capacity(draft.line_items.len());
        for (index, item) in draft.line_items.into_iter().enumerate() {
            let n = index + 1;
            if item.quantity < 1 {
                return Err(AppError::Validation(format!(
                    "line item {n}: quantity must be at least 1"
                )));
            }
            let unit_price = ensure_non_negative("unit_price", item.unit_price)
                .map_err(|e| AppError::Validation(format!("line item {n}: {e}")))?;
            let product = match (item.product_id, item.product) {
                (Some(id), None) => LineItemProduct::Existing(id),
                (None, Some(input)) => LineItemProduct::Inline(
                    input
                        .into_new(principal.org_id)
                        .map_err(|e| AppError::Validation(format!("line item {n}: {e}")))?,
                ),
                _ => {
                    return Err(AppError::Validation(format!(
                        "line item {n}: give either product_id or product"
                    )));
                }
            };
            line_items.push(NewLineItem {
                product,
                quantity: item.quantity,
                unit_price,
            });
        }

        Ok(NewOrder {
            org_id: principal.org_id,
            customer: CustomerSnapshot {
                first_name,
                last_name,
                email,
                phone: non_blank(draft.customer.phone),
            },
            shipping_address,
            total_amount,
            discounted_amount,
            sales_agent: principal
                .role
                .is_sales_capable()
                .then_some(principal.user_id),
            line_items,
        })
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// One order with its line items and payment history.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the order is missing or foreign.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn order(&self, principal: &Principal, id: OrderId) -> Result<OrderDetail, AppError> {
        require_staff(principal)?;
        let order = self.load(principal, id).await?;
        let line_items = self.store.list_order_products(id).await?;
        let transactions = self.store.list_transactions(id).await?;
        Ok(OrderDetail {
            order,
            line_items,
            transactions,
        })
    }

    /// Every order of the principal's organization, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is not staff or the store fails.
    pub async fn orders(&self, principal: &Principal) -> Result<Vec<Order>, AppError> {
        require_staff(principal)?;
        Ok(self
            .store
            .list_orders(OrderFilter::org(principal.org_id))
            .await?)
    }

    /// Orders the principal holds as processing agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is not staff or the store fails.
    pub async fn my_processing_orders(&self, principal: &Principal) -> Result<Vec<Order>, AppError> {
        require_staff(principal)?;
        Ok(self
            .store
            .list_orders(OrderFilter {
                processing_agent: Some(principal.user_id),
                ..OrderFilter::org(principal.org_id)
            })
            .await?)
    }

    /// The processing queue: pending orders nobody has claimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is not staff or the store fails.
    pub async fn available_for_processing(
        &self,
        principal: &Principal,
    ) -> Result<Vec<Order>, AppError> {
        require_staff(principal)?;
        Ok(self
            .store
            .list_orders(OrderFilter {
                unclaimed: true,
                fulfillment_status: Some(FulfillmentStatus::Pending),
                ..OrderFilter::org(principal.org_id)
            })
            .await?)
    }

    /// Orders the principal holds as follow-up agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is not staff or the store fails.
    pub async fn my_followup_orders(&self, principal: &Principal) -> Result<Vec<Order>, AppError> {
        require_staff(principal)?;
        Ok(self
            .store
            .list_orders(OrderFilter {
                followup_agent: Some(principal.user_id),
                ..OrderFilter::org(principal.org_id)
            })
            .await?)
    }

    // -------------------------------------------------------------------------
    // Status changes
    // -------------------------------------------------------------------------

    /// Move the payment axis. Writing the current status again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for an edge the policy rejects and
    /// [`AppError::Conflict`] if the status changed since it was read.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn update_payment_status(
        &self,
        principal: &Principal,
        id: OrderId,
        to: PaymentStatus,
    ) -> Result<Order, AppError> {
        require_staff(principal)?;
        let order = self.load(principal, id).await?;
        let from = order.payment_status;

        self.policy.check_payment(from, to).inspect_err(|e| {
            warn!(order_id = %id, error = %e, "Payment transition rejected");
        })?;
        if from == to {
            return Ok(order);
        }

        let updated = self
            .store
            .set_payment_status(id, from, to)
            .await?
            .ok_or_else(|| Self::changed_concurrently(id))?;

        info!(order_id = %id, %from, %to, "Payment status updated");
        Ok(updated)
    }

    /// Move the fulfillment axis directly.
    ///
    /// `shipped` is only reachable through the procurement gate, so a request
    /// for it is handled by [`Self::complete_order_procurement`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for an edge the policy rejects and
    /// [`AppError::Conflict`] if the status changed since it was read.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn update_fulfillment_status(
        &self,
        principal: &Principal,
        id: OrderId,
        to: FulfillmentStatus,
    ) -> Result<Order, AppError> {
        require_staff(principal)?;
        if to == FulfillmentStatus::Shipped {
            return self.complete_order_procurement(principal, id).await;
        }

        let order = self.load(principal, id).await?;
        let from = order.fulfillment_status;

        self.policy.check_fulfillment(from, to).inspect_err(|e| {
            warn!(order_id = %id, error = %e, "Fulfillment transition rejected");
        })?;
        if from == to {
            return Ok(order);
        }

        let updated = self
            .store
            .set_fulfillment_status(id, from, to)
            .await?
            .ok_or_else(|| Self::changed_concurrently(id))?;

        info!(order_id = %id, %from, %to, "Fulfillment status updated");
        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Agent slots
    // -------------------------------------------------------------------------

    /// Fill an agent slot.
    ///
    /// A non-admin may only claim the processing slot for themself. The claim
    /// succeeds only while the slot is empty; the loser of a race gets
    /// [`AppError::Conflict`] naming the winner. Admins may fill any slot with
    /// any active staff member and replace the current holder.
    ///
    /// Filling the processing slot of a pending order moves it to processing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`], [`AppError::Validation`] or
    /// [`AppError::Conflict`] as described above.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn assign_order_agent(
        &self,
        principal: &Principal,
        id: OrderId,
        slot: AgentType,
        agent_id: UserId,
    ) -> Result<Order, AppError> {
        require_staff(principal)?;
        let order = self.load(principal, id).await?;

        let self_claim =
            slot == AgentType::Processing && principal.is(agent_id) && !principal.role.is_admin();
        if !self_claim {
            require_admin(principal, "assign agents other than yourself as processing agent")?;
        }
        if order.fulfillment_status.is_terminal() {
            return Err(AppError::Validation(format!(
                "order {id} is {}; agents can no longer be assigned",
                order.fulfillment_status
            )));
        }
        active_staff(self.store, principal, agent_id).await?;

        if self_claim {
            match order.processing_agent {
                Some(holder) if holder == agent_id => return Ok(order),
                Some(holder) => {
                    warn!(order_id = %id, %holder, "Processing claim on a taken order");
                    return Err(AppError::Conflict(format!(
                        "order already assigned to user {holder}"
                    )));
                }
                None => {}
            }
        }

        let assignment = AgentAssignment {
            order_id: id,
            slot,
            agent_id,
            require_unassigned: self_claim,
            advance_fulfillment: (slot == AgentType::Processing)
                .then_some((FulfillmentStatus::Pending, FulfillmentStatus::Processing)),
        };

        let Some(updated) = self.store.assign_agent(assignment).await? else {
            return Err(self.explain_lost_claim(principal, id, agent_id).await);
        };

        info!(
            order_id = %id,
            slot = %slot,
            agent_id = %agent_id,
            fulfillment_status = %updated.fulfillment_status,
            "Agent assigned"
        );
        Ok(updated)
    }

    async fn explain_lost_claim(&self, principal: &Principal, id: OrderId, agent_id: UserId) -> AppError {
        match self.load(principal, id).await {
            Ok(current) => match current.processing_agent {
                Some(holder) if holder != agent_id => {
                    warn!(order_id = %id, %holder, "Lost processing claim race");
                    AppError::Conflict(format!("order already assigned to user {holder}"))
                }
                _ => Self::changed_concurrently(id),
            },
            Err(e) => e,
        }
    }

    // -------------------------------------------------------------------------
    // Procurement
    // -------------------------------------------------------------------------

    fn require_processing_holder(principal: &Principal, order: &Order) -> Result<(), AppError> {
        if principal.role.is_admin() || order.processing_agent == Some(principal.user_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "only the order's processing agent or an admin may record procurement"
                    .to_string(),
            ))
        }
    }

    /// Record what a line item really cost and where it came from.
    ///
    /// Non-admins may record it once, while the order is processing. Admins
    /// may correct it on any order that is not closed or cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for a non-positive cost, a blank
    /// source, a wrong order status or an already recorded line item.
    #[instrument(skip(self, principal, source), fields(user_id = %principal.user_id))]
    pub async fn update_order_product_procurement(
        &self,
        principal: &Principal,
        line_id: OrderProductId,
        cost: Decimal,
        source: String,
    ) -> Result<OrderProduct, AppError> {
        require_staff(principal)?;
        let line = in_tenant(
            principal,
            self.store.get_order_product(line_id).await?,
            "line item",
            line_id,
        )?;
        let order = self.load(principal, line.order_id).await?;
        Self::require_processing_holder(principal, &order)?;

        let cost = ensure_positive("procurement_cost", cost)?;
        let source = source.trim().to_string();
        if source.is_empty() {
            return Err(AppError::Validation(
                "procurement source is required".to_string(),
            ));
        }

        let admin = principal.role.is_admin();
        let status = order.fulfillment_status;
        let status_ok = if admin {
            !status.is_terminal()
        } else {
            status == FulfillmentStatus::Processing
        };
        if !status_ok {
            return Err(AppError::Validation(format!(
                "order {} is {status}; procurement cannot be recorded",
                order.id
            )));
        }
        if !admin && line.is_procured() {
            return Err(AppError::Validation(format!(
                "procurement for line item {line_id} is already recorded"
            )));
        }

        let updated = self
            .store
            .set_procurement(line_id, cost, source, !admin)
            .await?
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "procurement for line item {line_id} is already recorded"
                ))
            })?;

        info!(order_id = %order.id, line_id = %line_id, %cost, "Procurement recorded");
        Ok(updated)
    }

    /// Ship the order once every line item is costed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] naming the line items that still lack
    /// cost or source, or when the order cannot ship from its current status.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn complete_order_procurement(
        &self,
        principal: &Principal,
        id: OrderId,
    ) -> Result<Order, AppError> {
        require_staff(principal)?;
        let order = self.load(principal, id).await?;
        Self::require_processing_holder(principal, &order)?;

        let from = order.fulfillment_status;
        self.policy.check_shipment(from).inspect_err(|e| {
            warn!(order_id = %id, error = %e, "Shipment rejected");
        })?;
        if from == FulfillmentStatus::Shipped {
            return Ok(order);
        }

        let lines = self.store.list_order_products(id).await?;
        let incomplete: Vec<String> = lines
            .iter()
            .filter(|line| !line.is_procured())
            .map(|line| format!("{} ({})", line.id, line.product_name))
            .collect();
        if !incomplete.is_empty() {
            warn!(order_id = %id, missing = incomplete.len(), "Procurement incomplete");
            return Err(AppError::Validation(format!(
                "procurement incomplete for line items: {}",
                incomplete.join(", ")
            )));
        }

        let shipped = self
            .store
            .ship_if_procured(id, from)
            .await?
            .ok_or_else(|| Self::changed_concurrently(id))?;

        info!(order_id = %id, %from, "Procurement complete, order shipped");
        Ok(shipped)
    }

    // -------------------------------------------------------------------------
    // Tracking
    // -------------------------------------------------------------------------

    /// Attach a carrier tracking reference.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for a blank reference or a closed or
    /// cancelled order.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn update_order_tracking(
        &self,
        principal: &Principal,
        id: OrderId,
        tracking: String,
    ) -> Result<Order, AppError> {
        require_staff(principal)?;
        let order = self.load(principal, id).await?;

        let tracking = tracking.trim().to_string();
        if tracking.is_empty() {
            return Err(AppError::Validation(
                "tracking reference is required".to_string(),
            ));
        }
        if order.fulfillment_status.is_terminal() {
            return Err(AppError::Validation(format!(
                "order {id} is {}; tracking can no longer change",
                order.fulfillment_status
            )));
        }

        let updated = self
            .store
            .set_order_tracking(id, tracking)
            .await?
            .ok_or_else(|| AppError::not_found("order", id))?;

        info!(order_id = %id, "Tracking updated");
        Ok(updated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::services::testing::Fixture;

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("  Dana Reyes Ortiz "),
            ("Dana".to_string(), "Reyes Ortiz".to_string())
        );
        assert_eq!(split_name("Prince"), ("Prince".to_string(), String::new()));
        assert_eq!(
            split_name("Ada  King Lovelace"),
            ("Ada".to_string(), "King Lovelace".to_string())
        );
        assert_eq!(split_name("   "), (String::new(), String::new()));
    }

    #[tokio::test]
    async fn test_create_order_for_new_customer() {
        let fx = Fixture::new().await;
        let mut draft = fx.draft(&[&fx.brake_pad]);
        draft.customer.email = "new@x.com".to_string();

        let detail = fx.engine().create_order(&fx.sales, draft).await.unwrap();
        let order = &detail.order;

        assert_eq!(order.org_id, fx.org_id);
        assert_eq!(order.total_amount, dec!(100.00));
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Pending);
        assert_eq!(order.sales_agent, Some(fx.sales.user_id));
        assert_eq!(order.customer_name, "Dana Reyes");
        assert_eq!(detail.line_items.len(), 1);
        assert_eq!(detail.line_items[0].quantity, 2);
        assert_eq!(detail.line_items[0].unit_price, dec!(50.00));
        assert_eq!(detail.line_items[0].product_name, "Brake Pad");

        let customer = fx.store.get_user(order.customer_id).await.unwrap().unwrap();
        assert_eq!(customer.email.unwrap().as_str(), "new@x.com");
        assert_eq!(customer.role, parts_crm_core::Role::Customer);
        assert_eq!(customer.first_name, "Dana");
    }

    #[tokio::test]
    async fn test_processing_agent_does_not_become_sales_agent() {
        let fx = Fixture::new().await;
        let detail = fx
            .engine()
            .create_order(&fx.processing, fx.draft(&[&fx.brake_pad]))
            .await
            .unwrap();
        assert_eq!(detail.order.sales_agent, None);
    }

    #[tokio::test]
    async fn test_create_order_rejects_bad_drafts() {
        let fx = Fixture::new().await;
        let engine = fx.engine();

        let empty = fx.draft(&[]);
        assert!(matches!(
            engine.create_order(&fx.sales, empty).await,
            Err(AppError::Validation(_))
        ));

        let mut zero_qty = fx.draft(&[&fx.brake_pad]);
        zero_qty.line_items[0].quantity = 0;
        let err = engine.create_order(&fx.sales, zero_qty).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: line item 1: quantity must be at least 1"
        );

        let mut negative = fx.draft(&[&fx.brake_pad]);
        negative.line_items[0].unit_price = dec!(-1);
        assert!(matches!(
            engine.create_order(&fx.sales, negative).await,
            Err(AppError::Validation(_))
        ));

        let mut free = fx.draft(&[&fx.brake_pad]);
        free.total_amount = Decimal::ZERO;
        assert!(matches!(
            engine.create_order(&fx.sales, free).await,
            Err(AppError::Validation(_))
        ));

        assert!(matches!(
            engine
                .create_order(&fx.customer, fx.draft(&[&fx.brake_pad]))
                .await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_create_order_with_missing_product_is_atomic() {
        let fx = Fixture::new().await;
        let mut draft = fx.draft(&[&fx.brake_pad]);
        draft.customer.email = "ghost@x.com".to_string();
        draft.line_items.push(LineItemInput {
            product_id: Some(ProductId::new(424_242)),
            product: None,
            quantity: 1,
            unit_price: dec!(10),
        });

        let err = fx.engine().create_order(&fx.sales, draft).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: product 424242 does not exist"
        );
        assert!(fx.engine().orders(&fx.sales).await.unwrap().is_empty());
        let users = fx.store.list_users(fx.org_id).await.unwrap();
        assert!(
            users
                .iter()
                .all(|u| u.email.as_ref().is_none_or(|e| e.as_str() != "ghost@x.com"))
        );
    }

    #[tokio::test]
    async fn test_foreign_product_is_rejected() {
        let fx = Fixture::new().await;
        let draft = fx.draft(&[&fx.brake_pad]);
        let err = fx
            .engine()
            .create_order(&fx.outsider, draft)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_inline_product_is_created_with_order() {
        let fx = Fixture::new().await;
        let mut draft = fx.draft(&[]);
        draft.line_items.push(LineItemInput {
            product_id: None,
            product: Some(ProductInput {
                name: "Alternator".to_string(),
                code: Some("ALT-9".to_string()),
                make: None,
                model: None,
                year: None,
                description: None,
            }),
            quantity: 1,
            unit_price: dec!(180),
        });

        let detail = fx.engine().create_order(&fx.sales, draft).await.unwrap();
        assert_eq!(detail.line_items[0].product_name, "Alternator");
        let catalog = fx.store.list_products(fx.org_id).await.unwrap();
        assert!(catalog.iter().any(|p| p.name == "Alternator"));
    }

    #[tokio::test]
    async fn test_cross_tenant_reads_are_not_found() {
        let fx = Fixture::new().await;
        let detail = fx.order().await;

        let err = fx
            .engine()
            .order(&fx.outsider, detail.order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = fx
            .engine()
            .update_payment_status(&fx.outsider, detail.order.id, PaymentStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        assert!(fx.engine().orders(&fx.outsider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payment_status_is_idempotent_and_tabled() {
        let fx = Fixture::new().await;
        let id = fx.order().await.order.id;
        let engine = fx.engine();

        let once = engine
            .update_payment_status(&fx.sales, id, PaymentStatus::Paid)
            .await
            .unwrap();
        let twice = engine
            .update_payment_status(&fx.sales, id, PaymentStatus::Paid)
            .await
            .unwrap();
        assert_eq!(once.payment_status, PaymentStatus::Paid);
        assert_eq!(twice.payment_status, PaymentStatus::Paid);
        assert_eq!(once.updated_at, twice.updated_at);

        let err = engine
            .update_payment_status(&fx.sales, id, PaymentStatus::Unpaid)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_self_claim_advances_pending_order() {
        let fx = Fixture::new().await;
        let id = fx.order().await.order.id;

        let order = fx
            .engine()
            .assign_order_agent(&fx.processing, id, AgentType::Processing, fx.processing.user_id)
            .await
            .unwrap();
        assert_eq!(order.processing_agent, Some(fx.processing.user_id));
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);

        // Claiming again is a no-op.
        let again = fx
            .engine()
            .assign_order_agent(&fx.processing, id, AgentType::Processing, fx.processing.user_id)
            .await
            .unwrap();
        assert_eq!(again.updated_at, order.updated_at);

        let queue = fx.engine().available_for_processing(&fx.rival).await.unwrap();
        assert!(queue.is_empty());
        let mine = fx.engine().my_processing_orders(&fx.processing).await.unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn test_second_claim_conflicts_with_holder() {
        let fx = Fixture::new().await;
        let id = fx.order().await.order.id;
        fx.engine()
            .assign_order_agent(&fx.processing, id, AgentType::Processing, fx.processing.user_id)
            .await
            .unwrap();

        let err = fx
            .engine()
            .assign_order_agent(&fx.rival, id, AgentType::Processing, fx.rival.user_id)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Conflict: order already assigned to user {}", fx.processing.user_id)
        );
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_exactly_one_winner() {
        let fx = Fixture::new().await;
        let id = fx.order().await.order.id;

        let mut handles = Vec::new();
        for agent in [fx.processing.clone(), fx.rival.clone()] {
            let store = fx.store.clone();
            handles.push(tokio::spawn(async move {
                OrderEngine::new(&store, TransitionPolicy::Strict)
                    .assign_order_agent(&agent, id, AgentType::Processing, agent.user_id)
                    .await
            }));
        }

        let mut winners = Vec::new();
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(order) => winners.push(order.processing_agent),
                Err(AppError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 1);

        let stored = fx.store.get_order(id).await.unwrap().unwrap();
        assert_eq!(stored.processing_agent, winners[0]);
    }

    #[tokio::test]
    async fn test_assigning_others_requires_admin() {
        let fx = Fixture::new().await;
        let id = fx.order().await.order.id;

        let err = fx
            .engine()
            .assign_order_agent(&fx.processing, id, AgentType::Processing, fx.rival.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = fx
            .engine()
            .assign_order_agent(&fx.followup, id, AgentType::Followup, fx.followup.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let order = fx
            .engine()
            .assign_order_agent(&fx.admin, id, AgentType::Followup, fx.followup.user_id)
            .await
            .unwrap();
        assert_eq!(order.followup_agent, Some(fx.followup.user_id));
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Pending);

        let mine = fx.engine().my_followup_orders(&fx.followup).await.unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn test_admin_override_and_agent_validation() {
        let fx = Fixture::new().await;
        let id = fx.claimed_order().await.order.id;

        let order = fx
            .engine()
            .assign_order_agent(&fx.admin, id, AgentType::Processing, fx.rival.user_id)
            .await
            .unwrap();
        assert_eq!(order.processing_agent, Some(fx.rival.user_id));
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);

        for bad in [fx.customer.user_id, fx.outsider.user_id] {
            let err = fx
                .engine()
                .assign_order_agent(&fx.admin, id, AgentType::Sales, bad)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_processing_assignment_leaves_other_statuses_alone() {
        let fx = Fixture::new().await;
        let id = fx.order().await.order.id;
        fx.engine()
            .update_fulfillment_status(&fx.admin, id, FulfillmentStatus::Cancelled)
            .await
            .unwrap();

        let err = fx
            .engine()
            .assign_order_agent(&fx.processing, id, AgentType::Processing, fx.processing.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let stored = fx.store.get_order(id).await.unwrap().unwrap();
        assert_eq!(stored.fulfillment_status, FulfillmentStatus::Cancelled);
        assert_eq!(stored.processing_agent, None);
    }

    #[tokio::test]
    async fn test_strict_policy_blocks_gated_edges() {
        let fx = Fixture::new().await;
        let id = fx.order().await.order.id;

        let err = fx
            .engine()
            .update_fulfillment_status(&fx.admin, id, FulfillmentStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = fx
            .engine()
            .update_fulfillment_status(&fx.admin, id, FulfillmentStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_procurement_gate_names_incomplete_lines() {
        let fx = Fixture::new().await;
        let detail = fx.claimed_order().await;
        let (first, second) = (&detail.line_items[0], &detail.line_items[1]);

        fx.engine()
            .update_order_product_procurement(
                &fx.processing,
                first.id,
                dec!(31.50),
                "Supplier A".to_string(),
            )
            .await
            .unwrap();

        let err = fx
            .engine()
            .complete_order_procurement(&fx.processing, detail.order.id)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Validation failed: procurement incomplete for line items: {} (Rotor)",
                second.id
            )
        );
        let stored = fx.store.get_order(detail.order.id).await.unwrap().unwrap();
        assert_eq!(stored.fulfillment_status, FulfillmentStatus::Processing);

        fx.engine()
            .update_order_product_procurement(
                &fx.processing,
                second.id,
                dec!(80),
                "Supplier B".to_string(),
            )
            .await
            .unwrap();
        let shipped = fx
            .engine()
            .update_fulfillment_status(&fx.processing, detail.order.id, FulfillmentStatus::Shipped)
            .await
            .unwrap();
        assert_eq!(shipped.fulfillment_status, FulfillmentStatus::Shipped);

        let lines = fx.store.list_order_products(detail.order.id).await.unwrap();
        assert!(lines.iter().all(OrderProduct::is_procured));
    }

    #[tokio::test]
    async fn test_procurement_rules() {
        let fx = Fixture::new().await;
        let detail = fx.claimed_order().await;
        let line = detail.line_items[0].id;
        let engine = fx.engine();

        let err = engine
            .update_order_product_procurement(&fx.rival, line, dec!(5), "X".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = engine
            .update_order_product_procurement(&fx.processing, line, dec!(0), "X".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = engine
            .update_order_product_procurement(&fx.processing, line, dec!(5), "   ".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        engine
            .update_order_product_procurement(&fx.processing, line, dec!(5), " Supplier A ".to_string())
            .await
            .unwrap();
        let err = engine
            .update_order_product_procurement(&fx.processing, line, dec!(6), "Supplier B".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let corrected = engine
            .update_order_product_procurement(&fx.admin, line, dec!(6), "Supplier B".to_string())
            .await
            .unwrap();
        assert_eq!(corrected.procurement_cost, Some(dec!(6)));
        assert_eq!(corrected.procurement_source.as_deref(), Some("Supplier B"));

        let err = engine
            .update_order_product_procurement(&fx.outsider, line, dec!(6), "Z".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_closed() {
        let fx = Fixture::new().await;
        let detail = fx.claimed_order().await;
        let id = detail.order.id;
        for line in &detail.line_items {
            fx.engine()
                .update_order_product_procurement(&fx.processing, line.id, dec!(1), "Yard".to_string())
                .await
                .unwrap();
        }
        fx.engine()
            .complete_order_procurement(&fx.processing, id)
            .await
            .unwrap();
        fx.engine()
            .update_order_tracking(&fx.processing, id, "1Z999AA10123456784".to_string())
            .await
            .unwrap();

        for to in [FulfillmentStatus::Delivered, FulfillmentStatus::Closed] {
            let order = fx
                .engine()
                .update_fulfillment_status(&fx.followup, id, to)
                .await
                .unwrap();
            assert_eq!(order.fulfillment_status, to);
        }

        let err = fx
            .engine()
            .update_fulfillment_status(&fx.admin, id, FulfillmentStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = fx
            .engine()
            .update_order_tracking(&fx.admin, id, "NEW".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_permissive_policy_still_gates_shipping() {
        let fx = Fixture::new().await;
        let id = fx.order().await.order.id;
        let engine = OrderEngine::new(&fx.store, TransitionPolicy::Permissive);

        let order = engine
            .update_fulfillment_status(&fx.admin, id, FulfillmentStatus::Processing)
            .await
            .unwrap();
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);

        let err = engine
            .update_fulfillment_status(&fx.admin, id, FulfillmentStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
