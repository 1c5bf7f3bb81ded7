//! Ticket API handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use parts_crm_core::TicketId;

use crate::error::AppError;
use crate::middleware::RequirePrincipal;
use crate::models::Ticket;
use crate::services::{TicketDraft, TicketPatch};
use crate::state::AppState;

/// Build the tickets router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tickets", post(create_ticket).get(list_tickets))
        .route("/api/tickets/mine", get(my_tickets))
        .route("/api/tickets/{id}", get(get_ticket).patch(update_ticket))
        .route("/api/tickets/{id}/assign-to-me", post(assign_to_me))
        .route("/api/tickets/{id}/resolve", post(resolve_ticket))
}

async fn create_ticket(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Json(draft): Json<TicketDraft>,
) -> Result<(StatusCode, Json<Ticket>), AppError> {
    let ticket = state.tickets().create_ticket(&principal, draft).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn list_tickets(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.tickets().tickets(&principal).await?))
}

async fn my_tickets(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.tickets().my_tickets(&principal).await?))
}

async fn get_ticket(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<TicketId>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.tickets().ticket(&principal, id).await?))
}

async fn update_ticket(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<TicketId>,
    Json(patch): Json<TicketPatch>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(
        state.tickets().update_ticket(&principal, id, patch).await?,
    ))
}

async fn assign_to_me(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<TicketId>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.tickets().assign_to_me(&principal, id).await?))
}

async fn resolve_ticket(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<TicketId>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.tickets().resolve_ticket(&principal, id).await?))
}
