//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::CrmConfig;
use crate::db::Store;
use crate::identity::IdentityGate;
use crate::payments::Gateway;
use crate::services::{CatalogService, OrderEngine, PaymentService, ReceiptBacklog, TicketWorkflow};

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. The services are built per request from the
/// handles kept here.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: CrmConfig,
    store: Store,
    gateway: Gateway,
    identity: IdentityGate,
    backlog: ReceiptBacklog,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration
    /// * `store` - Record store selected at startup
    /// * `gateway` - Payment gateway selected at startup
    #[must_use]
    pub fn new(config: CrmConfig, store: Store, gateway: Gateway) -> Self {
        let identity = IdentityGate::new(&config.jwt);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                gateway,
                identity,
                backlog: ReceiptBacklog::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CrmConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.inner.gateway
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityGate {
        &self.inner.identity
    }

    /// Captured payments whose receipts are waiting to be recorded.
    #[must_use]
    pub fn backlog(&self) -> &ReceiptBacklog {
        &self.inner.backlog
    }

    #[must_use]
    pub fn orders(&self) -> OrderEngine<'_, Store> {
        OrderEngine::new(self.store(), self.config().transition_policy)
    }

    #[must_use]
    pub fn tickets(&self) -> TicketWorkflow<'_, Store> {
        TicketWorkflow::new(self.store(), self.config().transition_policy)
    }

    #[must_use]
    pub fn catalog(&self) -> CatalogService<'_, Store> {
        CatalogService::new(self.store())
    }

    #[must_use]
    pub fn payments(&self) -> PaymentService<'_, Store, Gateway> {
        PaymentService::new(
            self.store(),
            self.gateway(),
            self.config().transition_policy,
            self.backlog(),
        )
    }
}
