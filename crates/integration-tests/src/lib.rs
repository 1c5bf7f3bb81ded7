//! Integration tests for the parts CRM.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p parts-crm-integration-tests
//! ```
//!
//! The tests drive the real router in-process with `tower::ServiceExt::oneshot`,
//! backed by the in-memory store and the sandbox payment gateway. Requests
//! carry bearer tokens signed with the same secret the identity gate checks.
//!
//! # Test Categories
//!
//! - `orders` - Intake, agent claims, procurement gate, payments
//! - `tickets` - Ticket workflow
//! - `tenancy` - Role checks and tenant isolation

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::Duration;
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use parts_crm_core::{Email, OrganizationId, ProductId, Role, TransitionPolicy, UserId};
use parts_crm_server::config::CrmConfig;
use parts_crm_server::db::{
    MemoryStore, NewOrganization, NewProduct, NewUser, RecordStore, Store,
};
use parts_crm_server::identity::issue_token;
use parts_crm_server::payments::{Gateway, SandboxGateway};
use parts_crm_server::state::AppState;

const TEST_SECRET: &str = "kX9#mQ2$vL7@pR4!nW8^tY3&zB6*cF1%";

/// Card the sandbox gateway approves.
pub const GOOD_CARD: &str = "4242 4242 4242 4242";
pub use parts_crm_server::payments::{DECLINED_CARD, UNAVAILABLE_CARD};

/// A seeded user and a token that authenticates as them.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: UserId,
    pub org_id: OrganizationId,
    pub token: String,
}

/// The application wired to an in-memory store.
pub struct TestApp {
    router: Router,
    store: MemoryStore,
    secret: SecretString,
}

impl TestApp {
    /// Strict transitions.
    pub fn new() -> Self {
        Self::with_policy(TransitionPolicy::Strict)
    }

    pub fn with_policy(policy: TransitionPolicy) -> Self {
        let secret = SecretString::from(TEST_SECRET);
        let mut config = CrmConfig::for_secret(secret.clone());
        config.transition_policy = policy;

        let store = MemoryStore::new();
        let state = AppState::new(
            config,
            Store::Memory(store.clone()),
            Gateway::Sandbox(SandboxGateway::new()),
        );

        Self {
            router: parts_crm_server::app(state),
            store,
            secret,
        }
    }

    pub async fn org(&self, name: &str) -> OrganizationId {
        self.store
            .create_organization(NewOrganization {
                name: name.to_string(),
                contact_email: None,
            })
            .await
            .unwrap()
            .id
    }

    /// A user with subject `idp|<name>` and a one-hour token.
    pub async fn user(&self, org_id: OrganizationId, name: &str, role: Role) -> TestUser {
        let subject = format!("idp|{}", name.to_ascii_lowercase());
        let user = self
            .store
            .create_user(NewUser {
                org_id,
                external_id: Some(subject.clone()),
                first_name: name.to_string(),
                last_name: "Tester".to_string(),
                email: Some(
                    Email::parse(&format!("{}@{org_id}.crm.test", name.to_ascii_lowercase()))
                        .unwrap(),
                ),
                phone: None,
                role,
            })
            .await
            .unwrap();

        TestUser {
            id: user.id,
            org_id,
            token: self.token(&subject, None),
        }
    }

    pub fn token(&self, subject: &str, role: Option<&str>) -> String {
        issue_token(&self.secret, subject, role, Duration::hours(1)).unwrap()
    }

    pub async fn product(&self, org_id: OrganizationId, name: &str) -> ProductId {
        self.store
            .create_product(NewProduct {
                org_id,
                name: name.to_string(),
                code: None,
                make: Some("Honda".to_string()),
                model: Some("Civic".to_string()),
                year: Some(2014),
                description: None,
            })
            .await
            .unwrap()
            .id
    }

    /// Send one request and decode the JSON body (`Value::Null` when empty).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    pub async fn get(&self, user: &TestUser, path: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, Some(&user.token), None).await
    }

    pub async fn post(&self, user: &TestUser, path: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, path, Some(&user.token), Some(body))
            .await
    }

    pub async fn patch(&self, user: &TestUser, path: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, path, Some(&user.token), Some(body))
            .await
    }

    pub async fn delete(&self, user: &TestUser, path: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, path, Some(&user.token), None)
            .await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Order body with one line per product, two units at 50.00 each.
pub fn order_body(email: &str, products: &[ProductId]) -> Value {
    let line_items: Vec<Value> = products
        .iter()
        .map(|id| {
            serde_json::json!({
                "product_id": id,
                "quantity": 2,
                "unit_price": "50.00",
            })
        })
        .collect();

    serde_json::json!({
        "customer": { "name": "Dana Reyes", "email": email, "phone": "555-0100" },
        "shipping_address": "12 Elm St, Springfield",
        "total_amount": "100.00",
        "line_items": line_items,
    })
}

/// Card body for `POST /api/orders/{id}/payments`.
pub fn card_body(number: &str, save_card: bool) -> Value {
    serde_json::json!({
        "card_number": number,
        "cvv": "123",
        "expiry_month": 12,
        "expiry_year": 2030,
        "holder_name": "Dana Reyes",
        "save_card": save_card,
    })
}

/// Id field of a JSON record.
pub fn id_of(value: &Value) -> i64 {
    value["id"].as_i64().unwrap()
}
