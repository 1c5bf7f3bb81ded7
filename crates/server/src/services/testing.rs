//! Seeded tenants for service tests.

#![allow(clippy::unwrap_used)]

use rust_decimal_macros::dec;

use parts_crm_core::{Email, OrganizationId, Role, TransitionPolicy};

use super::orders::{CustomerInput, LineItemInput, OrderDraft, OrderEngine};
use crate::db::{MemoryStore, NewOrganization, NewProduct, NewUser, RecordStore};
use crate::models::{OrderDetail, Principal, Product};

/// Two organizations with a full staff in the first and an admin in the second.
pub struct Fixture {
    pub store: MemoryStore,
    pub org_id: OrganizationId,
    pub admin: Principal,
    pub sales: Principal,
    pub processing: Principal,
    pub rival: Principal,
    pub followup: Principal,
    pub customer: Principal,
    pub outsider: Principal,
    pub brake_pad: Product,
    pub rotor: Product,
}

async fn staff(store: &MemoryStore, org_id: OrganizationId, name: &str, role: Role) -> Principal {
    let email = Email::parse(&format!("{}@crm.test", name.to_ascii_lowercase())).unwrap();
    let user = store
        .create_user(NewUser {
            org_id,
            external_id: Some(format!("idp|{}", name.to_ascii_lowercase())),
            first_name: name.to_string(),
            last_name: "Test".to_string(),
            email: Some(email.clone()),
            phone: None,
            role,
        })
        .await
        .unwrap();
    Principal {
        user_id: user.id,
        org_id,
        role,
        email: Some(email),
    }
}

async fn product(store: &MemoryStore, org_id: OrganizationId, name: &str, code: &str) -> Product {
    store
        .create_product(NewProduct {
            org_id,
            name: name.to_string(),
            code: Some(code.to_string()),
            make: Some("Toyota".to_string()),
            model: Some("Corolla".to_string()),
            year: Some(2016),
            description: None,
        })
        .await
        .unwrap()
}

impl Fixture {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let org = store
            .create_organization(NewOrganization {
                name: "Northside Auto".to_string(),
                contact_email: None,
            })
            .await
            .unwrap();
        let other = store
            .create_organization(NewOrganization {
                name: "Southside Parts".to_string(),
                contact_email: None,
            })
            .await
            .unwrap();

        Self {
            admin: staff(&store, org.id, "Ada", Role::Admin).await,
            sales: staff(&store, org.id, "Sol", Role::Sales).await,
            processing: staff(&store, org.id, "Pia", Role::Processing).await,
            rival: staff(&store, org.id, "Rex", Role::Processing).await,
            followup: staff(&store, org.id, "Fay", Role::Followup).await,
            customer: staff(&store, org.id, "Cam", Role::Customer).await,
            outsider: staff(&store, other.id, "Oto", Role::Admin).await,
            brake_pad: product(&store, org.id, "Brake Pad", "BP-100").await,
            rotor: product(&store, org.id, "Rotor", "RT-220").await,
            org_id: org.id,
            store,
        }
    }

    pub fn engine(&self) -> OrderEngine<'_, MemoryStore> {
        OrderEngine::new(&self.store, TransitionPolicy::Strict)
    }

    /// Order for a new customer with one line item per product given.
    pub fn draft(&self, products: &[&Product]) -> OrderDraft {
        OrderDraft {
            customer: CustomerInput {
                name: "Dana Reyes".to_string(),
                email: "dana@example.org".to_string(),
                phone: Some("555-0100".to_string()),
            },
            shipping_address: "12 Elm St, Springfield".to_string(),
            total_amount: dec!(100.00),
            discounted_amount: None,
            line_items: products
                .iter()
                .map(|p| LineItemInput {
                    product_id: Some(p.id),
                    product: None,
                    quantity: 2,
                    unit_price: dec!(50.00),
                })
                .collect(),
        }
    }

    /// Order created by the sales agent with a brake pad and a rotor.
    pub async fn order(&self) -> OrderDetail {
        self.engine()
            .create_order(&self.sales, self.draft(&[&self.brake_pad, &self.rotor]))
            .await
            .unwrap()
    }

    /// Order already claimed by the processing agent.
    pub async fn claimed_order(&self) -> OrderDetail {
        let detail = self.order().await;
        self.engine()
            .assign_order_agent(
                &self.processing,
                detail.order.id,
                parts_crm_core::AgentType::Processing,
                self.processing.user_id,
            )
            .await
            .unwrap();
        self.engine()
            .order(&self.processing, detail.order.id)
            .await
            .unwrap()
    }
}
