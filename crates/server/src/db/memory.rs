//! In-memory record store.
//!
//! Every operation holds the write lock for its whole duration, so multi-row
//! writes are atomic and guarded writes behave like their SQL counterparts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::warn;

use parts_crm_core::{
    AgentType, FulfillmentStatus, OrderId, OrderProductId, OrganizationId, PaymentStatus,
    ProductId, Role, SavedCardId, TicketId, TicketStatus, TransactionId, TransactionStatus, UserId,
};

use super::{
    AgentAssignment, CaptureReceipt, LineItemProduct, NewOrder, NewOrganization, NewProduct,
    NewTicket, NewUser, OrderFilter, OrganizationPatch, RecordStore, RepositoryError,
    TicketFilter, TicketState,
};
use crate::models::{
    Order, OrderProduct, Organization, Product, SavedCard, Ticket, Transaction, User,
};

/// Process-local store for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i32,
    organizations: BTreeMap<OrganizationId, Organization>,
    users: BTreeMap<UserId, User>,
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    order_products: BTreeMap<OrderProductId, OrderProduct>,
    transactions: BTreeMap<TransactionId, Transaction>,
    saved_cards: BTreeMap<SavedCardId, SavedCard>,
    tickets: BTreeMap<TicketId, Ticket>,
    #[cfg(test)]
    fail_captures: bool,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    /// Ids are unique across tables, which makes accidental cross-table id
    /// reuse show up in tests.
    const fn allocate(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn check_user_unique(&self, new: &NewUser) -> Result<(), RepositoryError> {
        for user in self.users.values().filter(|u| !u.deleted) {
            if new.external_id.is_some() && user.external_id == new.external_id {
                return Err(RepositoryError::Conflict(
                    "external id already linked to a user".to_string(),
                ));
            }
            if new.email.is_some() && user.org_id == new.org_id && user.email == new.email {
                return Err(RepositoryError::Conflict(
                    "email already belongs to a user in this organization".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn insert_user(&mut self, new: NewUser) -> User {
        let now = Utc::now();
        let user = User {
            id: UserId::new(self.allocate()),
            org_id: new.org_id,
            external_id: new.external_id,
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone: new.phone,
            role: new.role,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        user
    }

    fn insert_product(&mut self, new: NewProduct) -> Product {
        let product = Product {
            id: ProductId::new(self.allocate()),
            org_id: new.org_id,
            name: new.name,
            code: new.code,
            make: new.make,
            model: new.model,
            year: new.year,
            description: new.description,
            created_at: Utc::now(),
        };
        self.products.insert(product.id, product.clone());
        product
    }

    fn order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    #[cfg(test)]
    fn capture_fault(&self) -> Result<(), RepositoryError> {
        if self.fail_captures {
            return Err(RepositoryError::DataCorruption(
                "capture writes disabled".to_string(),
            ));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    const fn capture_fault(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Make `record_capture` fail until switched back.
    pub(crate) async fn fail_captures(&self, fail: bool) {
        self.inner.write().await.fail_captures = fail;
    }
}

impl RecordStore for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn create_organization(
        &self,
        new: NewOrganization,
    ) -> Result<Organization, RepositoryError> {
        let mut tables = self.inner.write().await;
        let now = Utc::now();
        let org = Organization {
            id: OrganizationId::new(tables.allocate()),
            name: new.name,
            contact_email: new.contact_email,
            active: true,
            created_at: now,
            updated_at: now,
        };
        tables.organizations.insert(org.id, org.clone());
        Ok(org)
    }

    async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError> {
        Ok(self.inner.read().await.organizations.get(&id).cloned())
    }

    async fn update_organization(
        &self,
        id: OrganizationId,
        patch: OrganizationPatch,
    ) -> Result<Option<Organization>, RepositoryError> {
        let mut tables = self.inner.write().await;
        let Some(org) = tables.organizations.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            org.name = name;
        }
        if let Some(email) = patch.contact_email {
            org.contact_email = Some(email);
        }
        if let Some(active) = patch.active {
            org.active = active;
        }
        org.updated_at = Utc::now();
        Ok(Some(org.clone()))
    }

    async fn create_user(&self, new: NewUser) -> Result<User, RepositoryError> {
        let mut tables = self.inner.write().await;
        if !tables.organizations.contains_key(&new.org_id) {
            return Err(RepositoryError::MissingReference(format!(
                "organization {}",
                new.org_id
            )));
        }
        tables.check_user_unique(&new)?;
        Ok(tables.insert_user(new))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let tables = self.inner.read().await;
        Ok(tables
            .users
            .values()
            .filter(|u| u.external_id.as_deref() == Some(external_id))
            .min_by_key(|u| u.deleted)
            .cloned())
    }

    async fn list_users(&self, org_id: OrganizationId) -> Result<Vec<User>, RepositoryError> {
        let tables = self.inner.read().await;
        Ok(tables
            .users
            .values()
            .filter(|u| u.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn deactivate_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let mut tables = self.inner.write().await;
        Ok(tables.users.get_mut(&id).map(|user| {
            if !user.deleted {
                user.deleted = true;
                user.updated_at = Utc::now();
            }
            user.clone()
        }))
    }

    async fn create_product(&self, new: NewProduct) -> Result<Product, RepositoryError> {
        let mut tables = self.inner.write().await;
        Ok(tables.insert_product(new))
    }

    async fn list_products(
        &self,
        org_id: OrganizationId,
    ) -> Result<Vec<Product>, RepositoryError> {
        let tables = self.inner.read().await;
        let mut products: Vec<Product> = tables
            .products
            .values()
            .filter(|p| p.org_id == org_id)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn create_order(
        &self,
        new: NewOrder,
    ) -> Result<(Order, Vec<OrderProduct>), RepositoryError> {
        let mut tables = self.inner.write().await;

        // Validate every reference before the first write.
        for item in &new.line_items {
            if let LineItemProduct::Existing(product_id) = item.product {
                let found = tables
                    .products
                    .get(&product_id)
                    .is_some_and(|p| p.org_id == new.org_id);
                if !found {
                    return Err(RepositoryError::MissingReference(format!(
                        "product {product_id}"
                    )));
                }
            }
        }

        let existing_customer = tables
            .users
            .values()
            .find(|u| {
                !u.deleted && u.org_id == new.org_id && u.email.as_ref() == Some(&new.customer.email)
            })
            .map(|u| u.id);
        let customer_id = match existing_customer {
            Some(id) => id,
            None => {
                tables
                    .insert_user(NewUser {
                        org_id: new.org_id,
                        external_id: None,
                        first_name: new.customer.first_name.clone(),
                        last_name: new.customer.last_name.clone(),
                        email: Some(new.customer.email.clone()),
                        phone: new.customer.phone.clone(),
                        role: Role::Customer,
                    })
                    .id
            }
        };

        let now = Utc::now();
        let order = Order {
            id: OrderId::new(tables.allocate()),
            org_id: new.org_id,
            customer_id,
            customer_name: new.customer.full_name(),
            customer_email: new.customer.email,
            customer_phone: new.customer.phone,
            total_amount: new.total_amount,
            discounted_amount: new.discounted_amount,
            shipping_address: new.shipping_address,
            sales_agent: new.sales_agent,
            processing_agent: None,
            followup_agent: None,
            payment_status: PaymentStatus::Unpaid,
            fulfillment_status: FulfillmentStatus::Pending,
            order_tracking: None,
            created_at: now,
            updated_at: now,
        };
        tables.orders.insert(order.id, order.clone());

        let mut line_items = Vec::with_capacity(new.line_items.len());
        for item in new.line_items {
            let product = match item.product {
                LineItemProduct::Existing(id) => tables
                    .products
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| RepositoryError::MissingReference(format!("product {id}")))?,
                LineItemProduct::Inline(new_product) => tables.insert_product(new_product),
            };
            let line = OrderProduct {
                id: OrderProductId::new(tables.allocate()),
                order_id: order.id,
                org_id: order.org_id,
                product_id: product.id,
                product_name: product.name,
                product_code: product.code,
                make: product.make,
                model: product.model,
                year: product.year,
                quantity: item.quantity,
                unit_price: item.unit_price,
                procurement_cost: None,
                procurement_source: None,
            };
            tables.order_products.insert(line.id, line.clone());
            line_items.push(line);
        }

        Ok((order, line_items))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.inner.read().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let tables = self.inner.read().await;
        Ok(tables
            .orders
            .values()
            .rev()
            .filter(|o| o.org_id == filter.org_id)
            .filter(|o| {
                filter
                    .processing_agent
                    .is_none_or(|agent| o.processing_agent == Some(agent))
            })
            .filter(|o| {
                filter
                    .followup_agent
                    .is_none_or(|agent| o.followup_agent == Some(agent))
            })
            .filter(|o| !filter.unclaimed || o.processing_agent.is_none())
            .filter(|o| {
                filter
                    .fulfillment_status
                    .is_none_or(|status| o.fulfillment_status == status)
            })
            .cloned()
            .collect())
    }

    async fn list_order_products(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<OrderProduct>, RepositoryError> {
        let tables = self.inner.read().await;
        Ok(tables
            .order_products
            .values()
            .filter(|line| line.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn get_order_product(
        &self,
        id: OrderProductId,
    ) -> Result<Option<OrderProduct>, RepositoryError> {
        Ok(self.inner.read().await.order_products.get(&id).cloned())
    }

    async fn set_payment_status(
        &self,
        id: OrderId,
        expected: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tables = self.inner.write().await;
        Ok(tables
            .order_mut(id)
            .filter(|o| o.payment_status == expected)
            .map(|order| {
                order.payment_status = to;
                order.updated_at = Utc::now();
                order.clone()
            }))
    }

    async fn set_fulfillment_status(
        &self,
        id: OrderId,
        expected: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tables = self.inner.write().await;
        Ok(tables
            .order_mut(id)
            .filter(|o| o.fulfillment_status == expected)
            .map(|order| {
                order.fulfillment_status = to;
                order.updated_at = Utc::now();
                order.clone()
            }))
    }

    async fn ship_if_procured(
        &self,
        id: OrderId,
        expected: FulfillmentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tables = self.inner.write().await;
        let all_procured = tables
            .order_products
            .values()
            .filter(|line| line.order_id == id)
            .all(OrderProduct::is_procured);
        if !all_procured {
            return Ok(None);
        }
        Ok(tables
            .order_mut(id)
            .filter(|o| o.fulfillment_status == expected)
            .map(|order| {
                order.fulfillment_status = FulfillmentStatus::Shipped;
                order.updated_at = Utc::now();
                order.clone()
            }))
    }

    async fn set_order_tracking(
        &self,
        id: OrderId,
        tracking: String,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tables = self.inner.write().await;
        Ok(tables.order_mut(id).map(|order| {
            order.order_tracking = Some(tracking);
            order.updated_at = Utc::now();
            order.clone()
        }))
    }

    async fn assign_agent(
        &self,
        assignment: AgentAssignment,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tables = self.inner.write().await;
        let Some(order) = tables.order_mut(assignment.order_id) else {
            return Ok(None);
        };
        let slot = match assignment.slot {
            AgentType::Sales => &mut order.sales_agent,
            AgentType::Processing => &mut order.processing_agent,
            AgentType::Followup => &mut order.followup_agent,
        };
        if assignment.require_unassigned && slot.is_some() {
            return Ok(None);
        }
        *slot = Some(assignment.agent_id);
        if let Some((from, to)) = assignment.advance_fulfillment
            && order.fulfillment_status == from
        {
            order.fulfillment_status = to;
        }
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn set_procurement(
        &self,
        id: OrderProductId,
        cost: Decimal,
        source: String,
        only_if_unset: bool,
    ) -> Result<Option<OrderProduct>, RepositoryError> {
        let mut tables = self.inner.write().await;
        Ok(tables
            .order_products
            .get_mut(&id)
            .filter(|line| !(only_if_unset && line.is_procured()))
            .map(|line| {
                line.procurement_cost = Some(cost);
                line.procurement_source = Some(source);
                line.clone()
            }))
    }

    async fn record_capture(&self, receipt: CaptureReceipt) -> Result<Transaction, RepositoryError> {
        let mut tables = self.inner.write().await;
        tables.capture_fault()?;
        if !tables.orders.contains_key(&receipt.order_id) {
            return Err(RepositoryError::MissingReference(format!(
                "order {}",
                receipt.order_id
            )));
        }

        let now = Utc::now();
        let transaction = Transaction {
            id: TransactionId::new(tables.allocate()),
            order_id: receipt.order_id,
            org_id: receipt.org_id,
            user_id: receipt.user_id,
            amount: receipt.amount,
            status: TransactionStatus::Completed,
            payment_method: receipt.payment_method,
            gateway_transaction_id: receipt.gateway_transaction_id,
            auth_code: receipt.auth_code,
            response_code: receipt.response_code,
            metadata: receipt.metadata,
            created_at: now,
        };
        tables.transactions.insert(transaction.id, transaction.clone());

        if let Some(card) = receipt.saved_card {
            let saved = SavedCard {
                id: SavedCardId::new(tables.allocate()),
                org_id: receipt.org_id,
                customer_id: card.customer_id,
                gateway_token: card.gateway_token,
                last4: card.last4,
                brand: card.brand,
                created_at: now,
            };
            tables.saved_cards.insert(saved.id, saved);
        }

        if let Some(order) = tables.order_mut(receipt.order_id) {
            if order.payment_status == PaymentStatus::Refunded {
                warn!(order_id = %receipt.order_id, "Capture recorded on a refunded order");
            } else {
                order.payment_status = PaymentStatus::Paid;
            }
            if order.sales_agent.is_none() {
                order.sales_agent = receipt.stamp_sales_agent;
            }
            order.updated_at = now;
        }

        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        let tables = self.inner.read().await;
        Ok(tables
            .transactions
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_saved_cards(
        &self,
        org_id: OrganizationId,
        customer_id: UserId,
    ) -> Result<Vec<SavedCard>, RepositoryError> {
        let tables = self.inner.read().await;
        Ok(tables
            .saved_cards
            .values()
            .filter(|c| c.org_id == org_id && c.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn create_ticket(&self, new: NewTicket) -> Result<Ticket, RepositoryError> {
        let mut tables = self.inner.write().await;
        let now = Utc::now();
        let ticket = Ticket {
            id: TicketId::new(tables.allocate()),
            org_id: new.org_id,
            user_id: new.user_id,
            order_id: new.order_id,
            title: new.title,
            description: new.description,
            priority: new.priority,
            status: TicketStatus::Open,
            assigned_to: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, RepositoryError> {
        Ok(self.inner.read().await.tickets.get(&id).cloned())
    }

    async fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<Ticket>, RepositoryError> {
        let tables = self.inner.read().await;
        Ok(tables
            .tickets
            .values()
            .rev()
            .filter(|t| t.org_id == filter.org_id)
            .filter(|t| {
                filter
                    .assigned_to
                    .is_none_or(|user| t.assigned_to == Some(user))
            })
            .cloned()
            .collect())
    }

    async fn claim_ticket(
        &self,
        id: TicketId,
        user_id: UserId,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let mut tables = self.inner.write().await;
        Ok(tables
            .tickets
            .get_mut(&id)
            .filter(|t| t.status == TicketStatus::Open && t.assigned_to.is_none())
            .map(|ticket| {
                ticket.assigned_to = Some(user_id);
                ticket.status = TicketStatus::InProgress;
                ticket.updated_at = Utc::now();
                ticket.clone()
            }))
    }

    async fn set_ticket_state(
        &self,
        id: TicketId,
        expected: TicketState,
        next: TicketState,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let mut tables = self.inner.write().await;
        Ok(tables
            .tickets
            .get_mut(&id)
            .filter(|t| t.status == expected.status && t.assigned_to == expected.assigned_to)
            .map(|ticket| {
                ticket.status = next.status;
                ticket.assigned_to = next.assigned_to;
                ticket.priority = next.priority;
                ticket.resolved_at = next.resolved_at;
                ticket.updated_at = Utc::now();
                ticket.clone()
            }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use parts_crm_core::Email;

    use super::*;
    use crate::db::{CustomerSnapshot, NewLineItem};

    async fn seeded() -> (MemoryStore, OrganizationId, Product) {
        let store = MemoryStore::new();
        let org = store
            .create_organization(NewOrganization {
                name: "Northside Auto".to_string(),
                contact_email: None,
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                org_id: org.id,
                name: "Brake Pad".to_string(),
                code: Some("BP-100".to_string()),
                make: Some("Honda".to_string()),
                model: Some("Civic".to_string()),
                year: Some(2018),
                description: None,
            })
            .await
            .unwrap();
        (store, org.id, product)
    }

    fn order_for(org_id: OrganizationId, items: Vec<NewLineItem>) -> NewOrder {
        NewOrder {
            org_id,
            customer: CustomerSnapshot {
                first_name: "Dana".to_string(),
                last_name: "Reyes".to_string(),
                email: Email::parse("dana@example.org").unwrap(),
                phone: None,
            },
            shipping_address: "12 Elm St".to_string(),
            total_amount: dec!(100.00),
            discounted_amount: None,
            sales_agent: None,
            line_items: items,
        }
    }

    #[tokio::test]
    async fn test_create_order_with_missing_product_writes_nothing() {
        let (store, org_id, product) = seeded().await;
        let items = vec![
            NewLineItem {
                product: LineItemProduct::Existing(product.id),
                quantity: 1,
                unit_price: dec!(50.00),
            },
            NewLineItem {
                product: LineItemProduct::Existing(ProductId::new(9999)),
                quantity: 1,
                unit_price: dec!(50.00),
            },
        ];

        let err = store.create_order(order_for(org_id, items)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::MissingReference(_)));

        let tables = store.inner.read().await;
        assert!(tables.orders.is_empty());
        assert!(tables.order_products.is_empty());
        assert!(tables.users.is_empty());
    }

    #[tokio::test]
    async fn test_create_order_reuses_customer_by_email() {
        let (store, org_id, product) = seeded().await;
        let item = || NewLineItem {
            product: LineItemProduct::Existing(product.id),
            quantity: 2,
            unit_price: dec!(50.00),
        };

        let (first, _) = store.create_order(order_for(org_id, vec![item()])).await.unwrap();
        let (second, lines) = store.create_order(order_for(org_id, vec![item()])).await.unwrap();

        assert_eq!(first.customer_id, second.customer_id);
        assert_eq!(lines[0].product_name, "Brake Pad");
        assert_eq!(lines[0].org_id, org_id);
    }

    #[tokio::test]
    async fn test_claim_guard_rejects_second_writer() {
        let (store, org_id, product) = seeded().await;
        let (order, _) = store
            .create_order(order_for(
                org_id,
                vec![NewLineItem {
                    product: LineItemProduct::Existing(product.id),
                    quantity: 1,
                    unit_price: dec!(10),
                }],
            ))
            .await
            .unwrap();

        let claim = |agent| AgentAssignment {
            order_id: order.id,
            slot: AgentType::Processing,
            agent_id: UserId::new(agent),
            require_unassigned: true,
            advance_fulfillment: Some((FulfillmentStatus::Pending, FulfillmentStatus::Processing)),
        };

        let won = store.assign_agent(claim(501)).await.unwrap().unwrap();
        assert_eq!(won.processing_agent, Some(UserId::new(501)));
        assert_eq!(won.fulfillment_status, FulfillmentStatus::Processing);
        assert!(store.assign_agent(claim(502)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ship_guard_requires_every_line_procured() {
        let (store, org_id, product) = seeded().await;
        let item = || NewLineItem {
            product: LineItemProduct::Existing(product.id),
            quantity: 1,
            unit_price: dec!(10),
        };
        let (order, lines) = store
            .create_order(order_for(org_id, vec![item(), item()]))
            .await
            .unwrap();
        store
            .set_fulfillment_status(order.id, FulfillmentStatus::Pending, FulfillmentStatus::Processing)
            .await
            .unwrap();
        store
            .set_procurement(lines[0].id, dec!(4), "Supplier A".to_string(), true)
            .await
            .unwrap();

        assert!(
            store
                .ship_if_procured(order.id, FulfillmentStatus::Processing)
                .await
                .unwrap()
                .is_none()
        );

        store
            .set_procurement(lines[1].id, dec!(5), "Supplier B".to_string(), true)
            .await
            .unwrap();
        let shipped = store
            .ship_if_procured(order.id, FulfillmentStatus::Processing)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shipped.fulfillment_status, FulfillmentStatus::Shipped);
    }

    #[tokio::test]
    async fn test_set_procurement_only_if_unset() {
        let (store, org_id, product) = seeded().await;
        let (_, lines) = store
            .create_order(order_for(
                org_id,
                vec![NewLineItem {
                    product: LineItemProduct::Existing(product.id),
                    quantity: 1,
                    unit_price: dec!(10),
                }],
            ))
            .await
            .unwrap();

        store
            .set_procurement(lines[0].id, dec!(4), "Supplier A".to_string(), true)
            .await
            .unwrap()
            .unwrap();
        let blocked = store
            .set_procurement(lines[0].id, dec!(9), "Supplier Z".to_string(), true)
            .await
            .unwrap();
        assert!(blocked.is_none());

        let forced = store
            .set_procurement(lines[0].id, dec!(9), "Supplier Z".to_string(), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forced.procurement_cost, Some(dec!(9)));
    }

    #[tokio::test]
    async fn test_capture_receipt_keeps_a_refund() {
        let (store, org_id, product) = seeded().await;
        let (order, _) = store
            .create_order(order_for(
                org_id,
                vec![NewLineItem {
                    product: LineItemProduct::Existing(product.id),
                    quantity: 1,
                    unit_price: dec!(100),
                }],
            ))
            .await
            .unwrap();
        store
            .set_payment_status(order.id, PaymentStatus::Unpaid, PaymentStatus::Refunded)
            .await
            .unwrap()
            .unwrap();

        let transaction = store
            .record_capture(CaptureReceipt {
                org_id,
                order_id: order.id,
                user_id: order.customer_id,
                amount: dec!(100),
                payment_method: "card".to_string(),
                gateway_transaction_id: Some("gw_77".to_string()),
                auth_code: None,
                response_code: None,
                metadata: serde_json::Value::Null,
                stamp_sales_agent: None,
                saved_card: None,
            })
            .await
            .unwrap();

        assert_eq!(transaction.order_id, order.id);
        let order = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert_eq!(store.list_transactions(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_external_id_conflicts() {
        let (store, org_id, _) = seeded().await;
        let new = NewUser {
            org_id,
            external_id: Some("idp|42".to_string()),
            first_name: "Sam".to_string(),
            last_name: String::new(),
            email: None,
            phone: None,
            role: Role::Sales,
        };
        store.create_user(new.clone()).await.unwrap();
        let err = store.create_user(new).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }
}
