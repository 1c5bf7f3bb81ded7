//! Catalog, organization and user directory handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};

use parts_crm_core::UserId;

use crate::error::AppError;
use crate::middleware::RequirePrincipal;
use crate::models::{Organization, Product, SavedCard, User};
use crate::services::{OrganizationUpdate, ProductInput};
use crate::state::AppState;

/// Build the catalog and directory router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/products", get(list_products).post(create_product))
        .route("/api/users", get(list_users))
        .route("/api/users/{id}", delete(deactivate_user))
        .route(
            "/api/organization",
            get(get_organization).patch(update_organization),
        )
        .route("/api/customers/{id}/cards", get(saved_cards))
}

async fn list_products(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Product>>, AppError> {
    Ok(Json(state.catalog().products(&principal).await?))
}

async fn create_product(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Json(input): Json<ProductInput>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    let product = state.catalog().create_product(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn list_users(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.catalog().users(&principal).await?))
}

/// Soft-delete a user and drop their cached identity so their next request
/// is rejected.
async fn deactivate_user(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<User>, AppError> {
    let user = state.catalog().deactivate_user(&principal, id).await?;
    if let Some(external_id) = &user.external_id {
        state.identity().forget(external_id).await;
    }
    Ok(Json(user))
}

async fn get_organization(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Organization>, AppError> {
    Ok(Json(state.catalog().organization(&principal).await?))
}

async fn update_organization(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Json(update): Json<OrganizationUpdate>,
) -> Result<Json<Organization>, AppError> {
    Ok(Json(
        state
            .catalog()
            .update_organization(&principal, update)
            .await?,
    ))
}

async fn saved_cards(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(customer_id): Path<UserId>,
) -> Result<Json<Vec<SavedCard>>, AppError> {
    Ok(Json(
        state.catalog().saved_cards(&principal, customer_id).await?,
    ))
}
