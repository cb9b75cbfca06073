use super::common::{
    created_response, map_service_error, success_response, validate_input,
    validate_positive_quantity,
};
use crate::{
    entities::ManufacturingOrderState,
    errors::ApiError,
    handlers::AppState,
    services::manufacturing::{CreateManufacturingOrderInput, ManufacturingOrderFilter},
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for manufacturing order endpoints
pub fn manufacturing_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_manufacturing_order).get(list_manufacturing_orders))
        .route("/:id", get(get_manufacturing_order))
        .route("/:id/confirm", post(confirm_manufacturing_order))
        .route("/:id/complete", post(complete_manufacturing_order))
        .route("/:id/cancel", post(cancel_manufacturing_order))
        .route("/:id/work-orders", get(list_work_orders))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateManufacturingOrderRequest {
    pub product_id: Uuid,
    pub bom_id: Uuid,
    #[validate(custom = "validate_positive_quantity")]
    pub quantity_to_produce: f64,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<Uuid>,
    pub work_center_id: Option<Uuid>,
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CompleteManufacturingOrderRequest {
    #[validate(custom = "validate_positive_quantity")]
    pub quantity_produced: Option<f64>,
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListManufacturingOrdersQuery {
    pub state: Option<ManufacturingOrderState>,
    pub product_id: Option<Uuid>,
    pub limit: Option<u64>,
}

async fn create_manufacturing_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateManufacturingOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let planned = state
        .services
        .manufacturing_orders
        .create_manufacturing_order(CreateManufacturingOrderInput {
            product_id: payload.product_id,
            bom_id: payload.bom_id,
            quantity_to_produce: payload.quantity_to_produce,
            scheduled_date: payload.scheduled_date,
            assignee_id: payload.assignee_id,
            work_center_id: payload.work_center_id,
            actor_id: payload.actor_id,
        })
        .await
        .map_err(map_service_error)?;

    info!("Manufacturing order created: {}", planned.order.reference);
    Ok(created_response(planned))
}

async fn list_manufacturing_orders(
    State(state): State<AppState>,
    Query(query): Query<ListManufacturingOrdersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .manufacturing_orders
        .list_manufacturing_orders(ManufacturingOrderFilter {
            state: query.state,
            product_id: query.product_id,
            limit: query.limit,
        })
        .await
        .map_err(map_service_error)?;
    Ok(success_response(orders))
}

async fn get_manufacturing_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .manufacturing_orders
        .get_manufacturing_order(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

async fn confirm_manufacturing_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let transition = state
        .services
        .manufacturing_orders
        .confirm_manufacturing_order(id, payload.actor_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(transition))
}

async fn complete_manufacturing_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteManufacturingOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let transition = state
        .services
        .manufacturing_orders
        .complete_manufacturing_order(id, payload.quantity_produced, payload.actor_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(transition))
}

async fn cancel_manufacturing_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let transition = state
        .services
        .manufacturing_orders
        .cancel_manufacturing_order(id, payload.actor_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(transition))
}

async fn list_work_orders(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let work_orders = state
        .services
        .manufacturing_orders
        .work_orders(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(work_orders))
}
