//! Order API handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use rust_decimal::Decimal;
use serde::Deserialize;

use parts_crm_core::{
    AgentType, FulfillmentStatus, OrderId, OrderProductId, PaymentStatus, UserId,
};

use crate::error::AppError;
use crate::middleware::RequirePrincipal;
use crate::models::{Order, OrderDetail, OrderProduct};
use crate::payments::CardDetails;
use crate::services::{OrderDraft, PaymentOutcome};
use crate::state::AppState;

/// Build the orders router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/orders", post(create_order).get(list_orders))
        .route("/api/orders/processing/mine", get(my_processing_orders))
        .route(
            "/api/orders/processing/available",
            get(available_for_processing),
        )
        .route("/api/orders/followup/mine", get(my_followup_orders))
        .route("/api/orders/{id}", get(get_order))
        .route("/api/orders/{id}/payment-status", post(update_payment_status))
        .route(
            "/api/orders/{id}/fulfillment-status",
            post(update_fulfillment_status),
        )
        .route("/api/orders/{id}/agents", post(assign_agent))
        .route(
            "/api/orders/{id}/procurement/complete",
            post(complete_procurement),
        )
        .route("/api/orders/{id}/tracking", post(update_tracking))
        .route("/api/orders/{id}/payments", post(capture_payment))
        .route(
            "/api/order-products/{id}/procurement",
            patch(update_procurement),
        )
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub status: PaymentStatus,
}

#[derive(Debug, Deserialize)]
pub struct FulfillmentStatusRequest {
    pub status: FulfillmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct AssignAgentRequest {
    pub agent_type: AgentType,
    pub agent_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct TrackingRequest {
    pub tracking: String,
}

#[derive(Debug, Deserialize)]
pub struct ProcurementRequest {
    pub cost: Decimal,
    pub source: String,
}

/// Card fields as posted. Never logged.
#[derive(Deserialize)]
pub struct CapturePaymentRequest {
    pub card_number: String,
    pub cvv: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    #[serde(default)]
    pub holder_name: Option<String>,
    #[serde(default)]
    pub save_card: bool,
}

async fn create_order(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Json(draft): Json<OrderDraft>,
) -> Result<(StatusCode, Json<OrderDetail>), AppError> {
    let detail = state.orders().create_order(&principal, draft).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn list_orders(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders().orders(&principal).await?))
}

async fn get_order(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderDetail>, AppError> {
    Ok(Json(state.orders().order(&principal, id).await?))
}

async fn my_processing_orders(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders().my_processing_orders(&principal).await?))
}

async fn available_for_processing(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(
        state.orders().available_for_processing(&principal).await?,
    ))
}

async fn my_followup_orders(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders().my_followup_orders(&principal).await?))
}

async fn update_payment_status(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(body): Json<PaymentStatusRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .orders()
            .update_payment_status(&principal, id, body.status)
            .await?,
    ))
}

async fn update_fulfillment_status(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(body): Json<FulfillmentStatusRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .orders()
            .update_fulfillment_status(&principal, id, body.status)
            .await?,
    ))
}

async fn assign_agent(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(body): Json<AssignAgentRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .orders()
            .assign_order_agent(&principal, id, body.agent_type, body.agent_id)
            .await?,
    ))
}

async fn complete_procurement(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .orders()
            .complete_order_procurement(&principal, id)
            .await?,
    ))
}

async fn update_tracking(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(body): Json<TrackingRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .orders()
            .update_order_tracking(&principal, id, body.tracking)
            .await?,
    ))
}

async fn update_procurement(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<OrderProductId>,
    Json(body): Json<ProcurementRequest>,
) -> Result<Json<OrderProduct>, AppError> {
    Ok(Json(
        state
            .orders()
            .update_order_product_procurement(&principal, id, body.cost, body.source)
            .await?,
    ))
}

async fn capture_payment(
    RequirePrincipal(principal): RequirePrincipal,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(body): Json<CapturePaymentRequest>,
) -> Result<Json<PaymentOutcome>, AppError> {
    let card = CardDetails::new(
        &body.card_number,
        &body.cvv,
        body.expiry_month,
        body.expiry_year,
        body.holder_name,
    )
    .map_err(|e| AppError::Validation(e.to_string()))?;

    Ok(Json(
        state
            .payments()
            .capture_payment(&principal, id, card, body.save_card)
            .await?,
    ))
}
