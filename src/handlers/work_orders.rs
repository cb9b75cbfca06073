use super::common::{map_service_error, success_response, validate_input, validate_non_negative};
use crate::{
    entities::WorkOrderState, errors::ApiError, handlers::AppState,
    services::work_orders::WorkOrderFilter,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for work order endpoints
pub fn work_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_work_orders))
        .route("/:id", get(get_work_order))
        .route("/:id/start", post(start_work_order))
        .route("/:id/complete", post(complete_work_order))
        .route("/:id/cancel", post(cancel_work_order))
}

#[derive(Debug, Deserialize)]
pub struct WorkOrderFilters {
    pub manufacturing_order_id: Option<Uuid>,
    pub state: Option<WorkOrderState>,
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CompleteWorkOrderRequest {
    /// Minutes; ignored when the order has a recorded start
    #[validate(custom = "validate_non_negative")]
    pub actual_time: Option<f64>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

pub async fn list_work_orders(
    State(state): State<AppState>,
    Query(filters): Query<WorkOrderFilters>,
) -> Result<impl IntoResponse, ApiError> {
    let work_orders = state
        .services
        .work_orders
        .list_work_orders(WorkOrderFilter {
            manufacturing_order_id: filters.manufacturing_order_id,
            state: filters.state,
            limit: filters.limit,
        })
        .await
        .map_err(map_service_error)?;
    Ok(success_response(work_orders))
}

pub async fn get_work_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let work_order = state
        .services
        .work_orders
        .get_work_order(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(work_order))
}

pub async fn start_work_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let work_order = state
        .services
        .work_orders
        .start_work_order(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(work_order))
}

pub async fn complete_work_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CompleteWorkOrderRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    validate_input(&payload)?;

    let work_order = state
        .services
        .work_orders
        .complete_work_order(id, payload.actual_time, payload.notes)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(work_order))
}

pub async fn cancel_work_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let work_order = state
        .services
        .work_orders
        .cancel_work_order(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(work_order))
}
