//! `PostgreSQL` record store.
//!
//! Queries are checked at runtime (`query_as` + `FromRow`) so the crate builds
//! without a live database. Guarded writes are single `UPDATE ... WHERE ...
//! RETURNING *` statements; multi-row writes run inside `pool.begin()`.

use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;

use parts_crm_core::{
    AgentType, FulfillmentStatus, OrderId, OrderProductId, OrganizationId, PaymentStatus, Role,
    TicketId, TicketStatus, TransactionStatus, UserId,
};

use super::{
    AgentAssignment, CaptureReceipt, LineItemProduct, NewOrder, NewOrganization, NewProduct,
    NewTicket, NewUser, OrderFilter, OrganizationPatch, RecordStore, RepositoryError,
    TicketFilter, TicketState,
};
use crate::models::{
    Order, OrderProduct, Organization, Product, SavedCard, Ticket, Transaction, User,
};

/// Record store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn unique_violation(message: &str) -> impl FnOnce(sqlx::Error) -> RepositoryError + '_ {
    move |e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return RepositoryError::Conflict(message.to_owned());
        }
        RepositoryError::Database(e)
    }
}

const fn agent_column(slot: AgentType) -> &'static str {
    match slot {
        AgentType::Sales => "sales_agent",
        AgentType::Processing => "processing_agent",
        AgentType::Followup => "followup_agent",
    }
}

const INSERT_PRODUCT: &str = r"
    INSERT INTO product (org_id, name, code, make, model, year, description)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    RETURNING *
";

impl RecordStore for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_organization(
        &self,
        new: NewOrganization,
    ) -> Result<Organization, RepositoryError> {
        let org = sqlx::query_as::<_, Organization>(
            r"
            INSERT INTO organization (name, contact_email)
            VALUES ($1, $2)
            RETURNING *
            ",
        )
        .bind(new.name)
        .bind(new.contact_email)
        .fetch_one(&self.pool)
        .await?;

        Ok(org)
    }

    async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError> {
        let org = sqlx::query_as::<_, Organization>("SELECT * FROM organization WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(org)
    }

    async fn update_organization(
        &self,
        id: OrganizationId,
        patch: OrganizationPatch,
    ) -> Result<Option<Organization>, RepositoryError> {
        let org = sqlx::query_as::<_, Organization>(
            r"
            UPDATE organization
            SET name = COALESCE($2, name),
                contact_email = COALESCE($3, contact_email),
                active = COALESCE($4, active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(patch.name)
        .bind(patch.contact_email)
        .bind(patch.active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    async fn create_user(&self, new: NewUser) -> Result<User, RepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r"
            INSERT INTO crm_user (org_id, external_id, first_name, last_name, email, phone, role)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            ",
        )
        .bind(new.org_id)
        .bind(new.external_id)
        .bind(new.first_name)
        .bind(new.last_name)
        .bind(new.email)
        .bind(new.phone)
        .bind(new.role)
        .fetch_one(&self.pool)
        .await
        .map_err(unique_violation("email or external id already in use"))?;

        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM crm_user WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        // A live link wins over a soft-deleted one.
        let user = sqlx::query_as::<_, User>(
            r"
            SELECT * FROM crm_user
            WHERE external_id = $1
            ORDER BY deleted ASC, id DESC
            LIMIT 1
            ",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list_users(&self, org_id: OrganizationId) -> Result<Vec<User>, RepositoryError> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM crm_user WHERE org_id = $1 ORDER BY id")
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }

    async fn deactivate_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r"
            UPDATE crm_user
            SET deleted = TRUE,
                updated_at = CASE WHEN deleted THEN updated_at ELSE NOW() END
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_product(&self, new: NewProduct) -> Result<Product, RepositoryError> {
        let product = sqlx::query_as::<_, Product>(INSERT_PRODUCT)
            .bind(new.org_id)
            .bind(new.name)
            .bind(new.code)
            .bind(new.make)
            .bind(new.model)
            .bind(new.year)
            .bind(new.description)
            .fetch_one(&self.pool)
            .await?;

        Ok(product)
    }

    async fn list_products(
        &self,
        org_id: OrganizationId,
    ) -> Result<Vec<Product>, RepositoryError> {
        let products =
            sqlx::query_as::<_, Product>("SELECT * FROM product WHERE org_id = $1 ORDER BY name")
                .bind(org_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(products)
    }

    async fn create_order(
        &self,
        new: NewOrder,
    ) -> Result<(Order, Vec<OrderProduct>), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Resolve-or-create in one statement so concurrent intakes for the
        // same new email converge on one customer.
        let customer_id: UserId = sqlx::query_scalar(
            r"
            INSERT INTO crm_user (org_id, first_name, last_name, email, phone, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (org_id, email) WHERE NOT deleted
            DO UPDATE SET updated_at = crm_user.updated_at
            RETURNING id
            ",
        )
        .bind(new.org_id)
        .bind(&new.customer.first_name)
        .bind(&new.customer.last_name)
        .bind(&new.customer.email)
        .bind(&new.customer.phone)
        .bind(Role::Customer)
        .fetch_one(&mut *tx)
        .await?;

        let order = sqlx::query_as::<_, Order>(
            r"
            INSERT INTO customer_order (
                org_id, customer_id, customer_name, customer_email, customer_phone,
                total_amount, discounted_amount, shipping_address, sales_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            ",
        )
        .bind(new.org_id)
        .bind(customer_id)
        .bind(new.customer.full_name())
        .bind(&new.customer.email)
        .bind(&new.customer.phone)
        .bind(new.total_amount)
        .bind(new.discounted_amount)
        .bind(&new.shipping_address)
        .bind(new.sales_agent)
        .fetch_one(&mut *tx)
        .await?;

        let mut line_items = Vec::with_capacity(new.line_items.len());
        for item in new.line_items {
            let product = match item.product {
                LineItemProduct::Existing(id) => {
                    sqlx::query_as::<_, Product>(
                        "SELECT * FROM product WHERE id = $1 AND org_id = $2 FOR SHARE",
                    )
                    .bind(id)
                    .bind(new.org_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    // Dropping `tx` rolls the order back.
                    .ok_or_else(|| RepositoryError::MissingReference(format!("product {id}")))?
                }
                LineItemProduct::Inline(p) => {
                    sqlx::query_as::<_, Product>(INSERT_PRODUCT)
                        .bind(p.org_id)
                        .bind(p.name)
                        .bind(p.code)
                        .bind(p.make)
                        .bind(p.model)
                        .bind(p.year)
                        .bind(p.description)
                        .fetch_one(&mut *tx)
                        .await?
                }
            };

            let line = sqlx::query_as::<_, OrderProduct>(
                r"
                INSERT INTO order_product (
                    order_id, org_id, product_id, product_name, product_code,
                    make, model, year, quantity, unit_price
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING *
                ",
            )
            .bind(order.id)
            .bind(order.org_id)
            .bind(product.id)
            .bind(product.name)
            .bind(product.code)
            .bind(product.make)
            .bind(product.model)
            .bind(product.year)
            .bind(item.quantity)
            .bind(item.unit_price)
            .fetch_one(&mut *tx)
            .await?;
            line_items.push(line);
        }

        tx.commit().await?;
        Ok((order, line_items))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM customer_order WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let orders = sqlx::query_as::<_, Order>(
            r"
            SELECT * FROM customer_order
            WHERE org_id = $1
              AND ($2::INTEGER IS NULL OR processing_agent = $2)
              AND ($3::INTEGER IS NULL OR followup_agent = $3)
              AND (NOT $4 OR processing_agent IS NULL)
              AND ($5::fulfillment_status IS NULL OR fulfillment_status = $5)
            ORDER BY id DESC
            ",
        )
        .bind(filter.org_id)
        .bind(filter.processing_agent)
        .bind(filter.followup_agent)
        .bind(filter.unclaimed)
        .bind(filter.fulfillment_status)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn list_order_products(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<OrderProduct>, RepositoryError> {
        let lines = sqlx::query_as::<_, OrderProduct>(
            "SELECT * FROM order_product WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    async fn get_order_product(
        &self,
        id: OrderProductId,
    ) -> Result<Option<OrderProduct>, RepositoryError> {
        let line = sqlx::query_as::<_, OrderProduct>("SELECT * FROM order_product WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(line)
    }

    async fn set_payment_status(
        &self,
        id: OrderId,
        expected: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>(
            r"
            UPDATE customer_order
            SET payment_status = $3, updated_at = NOW()
            WHERE id = $1 AND payment_status = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(expected)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn set_fulfillment_status(
        &self,
        id: OrderId,
        expected: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>(
            r"
            UPDATE customer_order
            SET fulfillment_status = $3, updated_at = NOW()
            WHERE id = $1 AND fulfillment_status = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(expected)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn ship_if_procured(
        &self,
        id: OrderId,
        expected: FulfillmentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>(
            r"
            UPDATE customer_order
            SET fulfillment_status = 'shipped', updated_at = NOW()
            WHERE id = $1
              AND fulfillment_status = $2
              AND NOT EXISTS (
                  SELECT 1 FROM order_product
                  WHERE order_id = $1
                    AND (procurement_cost IS NULL OR procurement_source IS NULL)
              )
            RETURNING *
            ",
        )
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn set_order_tracking(
        &self,
        id: OrderId,
        tracking: String,
    ) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>(
            r"
            UPDATE customer_order
            SET order_tracking = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(tracking)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn assign_agent(
        &self,
        assignment: AgentAssignment,
    ) -> Result<Option<Order>, RepositoryError> {
        let column = agent_column(assignment.slot);
        let sql = format!(
            r"
            UPDATE customer_order
            SET {column} = $2,
                fulfillment_status = CASE
                    WHEN $4::fulfillment_status IS NOT NULL AND fulfillment_status = $4
                    THEN $5::fulfillment_status
                    ELSE fulfillment_status
                END,
                updated_at = NOW()
            WHERE id = $1 AND (NOT $3 OR {column} IS NULL)
            RETURNING *
            "
        );
        let (from, to) = assignment.advance_fulfillment.unzip();

        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(assignment.order_id)
            .bind(assignment.agent_id)
            .bind(assignment.require_unassigned)
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
    }

    async fn set_procurement(
        &self,
        id: OrderProductId,
        cost: Decimal,
        source: String,
        only_if_unset: bool,
    ) -> Result<Option<OrderProduct>, RepositoryError> {
        let line = sqlx::query_as::<_, OrderProduct>(
            r"
            UPDATE order_product
            SET procurement_cost = $2, procurement_source = $3
            WHERE id = $1
              AND (NOT $4 OR procurement_cost IS NULL OR procurement_source IS NULL)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(cost)
        .bind(source)
        .bind(only_if_unset)
        .fetch_optional(&self.pool)
        .await?;

        Ok(line)
    }

    async fn record_capture(&self, receipt: CaptureReceipt) -> Result<Transaction, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let transaction = sqlx::query_as::<_, Transaction>(
            r"
            INSERT INTO payment_transaction (
                order_id, org_id, user_id, amount, status, payment_method,
                gateway_transaction_id, auth_code, response_code, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            ",
        )
        .bind(receipt.order_id)
        .bind(receipt.org_id)
        .bind(receipt.user_id)
        .bind(receipt.amount)
        .bind(TransactionStatus::Completed)
        .bind(receipt.payment_method)
        .bind(receipt.gateway_transaction_id)
        .bind(receipt.auth_code)
        .bind(receipt.response_code)
        .bind(receipt.metadata)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(card) = receipt.saved_card {
            sqlx::query(
                r"
                INSERT INTO saved_card (org_id, customer_id, gateway_token, last4, brand)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(receipt.org_id)
            .bind(card.customer_id)
            .bind(card.gateway_token)
            .bind(card.last4)
            .bind(card.brand)
            .execute(&mut *tx)
            .await?;
        }

        // A refund that landed during the gateway call keeps its status.
        let status: PaymentStatus = sqlx::query_scalar(
            r"
            UPDATE customer_order
            SET payment_status = CASE
                    WHEN payment_status = 'refunded' THEN payment_status
                    ELSE 'paid'
                END,
                sales_agent = COALESCE(sales_agent, $2),
                updated_at = NOW()
            WHERE id = $1
            RETURNING payment_status
            ",
        )
        .bind(receipt.order_id)
        .bind(receipt.stamp_sales_agent)
        .fetch_one(&mut *tx)
        .await?;
        if status == PaymentStatus::Refunded {
            warn!(order_id = %receipt.order_id, "Capture recorded on a refunded order");
        }

        tx.commit().await?;
        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        let transactions = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM payment_transaction WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn list_saved_cards(
        &self,
        org_id: OrganizationId,
        customer_id: UserId,
    ) -> Result<Vec<SavedCard>, RepositoryError> {
        let cards = sqlx::query_as::<_, SavedCard>(
            "SELECT * FROM saved_card WHERE org_id = $1 AND customer_id = $2 ORDER BY id",
        )
        .bind(org_id)
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(cards)
    }

    async fn create_ticket(&self, new: NewTicket) -> Result<Ticket, RepositoryError> {
        let ticket = sqlx::query_as::<_, Ticket>(
            r"
            INSERT INTO ticket (org_id, user_id, order_id, title, description, priority)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            ",
        )
        .bind(new.org_id)
        .bind(new.user_id)
        .bind(new.order_id)
        .bind(new.title)
        .bind(new.description)
        .bind(new.priority)
        .fetch_one(&self.pool)
        .await?;

        Ok(ticket)
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM ticket WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(ticket)
    }

    async fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<Ticket>, RepositoryError> {
        let tickets = sqlx::query_as::<_, Ticket>(
            r"
            SELECT * FROM ticket
            WHERE org_id = $1 AND ($2::INTEGER IS NULL OR assigned_to = $2)
            ORDER BY id DESC
            ",
        )
        .bind(filter.org_id)
        .bind(filter.assigned_to)
        .fetch_all(&self.pool)
        .await?;

        Ok(tickets)
    }

    async fn claim_ticket(
        &self,
        id: TicketId,
        user_id: UserId,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let ticket = sqlx::query_as::<_, Ticket>(
            r"
            UPDATE ticket
            SET assigned_to = $2, status = $3, updated_at = NOW()
            WHERE id = $1 AND assigned_to IS NULL AND status = $4
            RETURNING *
            ",
        )
        .bind(id)
        .bind(user_id)
        .bind(TicketStatus::InProgress)
        .bind(TicketStatus::Open)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ticket)
    }

    async fn set_ticket_state(
        &self,
        id: TicketId,
        expected: TicketState,
        next: TicketState,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let ticket = sqlx::query_as::<_, Ticket>(
            r"
            UPDATE ticket
            SET status = $4,
                assigned_to = $5,
                priority = $6,
                resolved_at = $7,
                updated_at = NOW()
            WHERE id = $1
              AND status = $2
              AND assigned_to IS NOT DISTINCT FROM $3
            RETURNING *
            ",
        )
        .bind(id)
        .bind(expected.status)
        .bind(expected.assigned_to)
        .bind(next.status)
        .bind(next.assigned_to)
        .bind(next.priority)
        .bind(next.resolved_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ticket)
    }
}
