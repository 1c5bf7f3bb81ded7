//! HTTP route handlers for the CRM API.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                               - Liveness
//! GET    /health/ready                         - Store connectivity
//!
//! # Orders
//! POST   /api/orders                           - Take an order
//! GET    /api/orders                           - All orders of the tenant
//! GET    /api/orders/{id}                      - Order with line items and transactions
//! GET    /api/orders/processing/mine           - Orders I process
//! GET    /api/orders/processing/available      - Unclaimed pending orders
//! GET    /api/orders/followup/mine             - Orders I follow up
//! POST   /api/orders/{id}/payment-status       - Move the payment axis
//! POST   /api/orders/{id}/fulfillment-status   - Move the fulfillment axis
//! POST   /api/orders/{id}/agents               - Claim or assign an agent slot
//! POST   /api/orders/{id}/procurement/complete - Ship once every line is procured
//! POST   /api/orders/{id}/tracking             - Set the tracking reference
//! POST   /api/orders/{id}/payments             - Capture a card payment
//! PATCH  /api/order-products/{id}/procurement  - Record procurement cost and source
//!
//! # Tickets
//! POST   /api/tickets                          - Open a ticket
//! GET    /api/tickets                          - All tickets of the tenant
//! GET    /api/tickets/mine                     - Tickets assigned to me
//! GET    /api/tickets/{id}                     - Ticket detail
//! PATCH  /api/tickets/{id}                     - Change status, assignee or priority
//! POST   /api/tickets/{id}/assign-to-me        - Claim a ticket
//! POST   /api/tickets/{id}/resolve             - Resolve a ticket
//!
//! # Catalog and directory
//! GET    /api/products                         - Catalog
//! POST   /api/products                         - Add a product (admin)
//! GET    /api/users                            - Users of the tenant (admin)
//! DELETE /api/users/{id}                       - Deactivate a user (admin)
//! GET    /api/organization                     - The caller's organization
//! PATCH  /api/organization                     - Update it (admin)
//! GET    /api/customers/{id}/cards             - Cards on file for a customer
//! ```

pub mod catalog;
pub mod orders;
pub mod tickets;

use axum::{Router, extract::State, http::StatusCode, routing::get};
use tracing::error;

use crate::db::RecordStore;
use crate::state::AppState;

/// Build the complete router, without the outer middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(orders::router())
        .merge(tickets::router())
        .merge(catalog::router())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the store is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(error = %e, backend = state.store().backend(), "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
