use super::common::{
    created_response, map_service_error, success_response, validate_input, validate_non_negative,
    validate_positive_quantity,
};
use crate::{errors::ApiError, handlers::AppState, services::catalog::CreateWorkCenterInput};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::Deserialize;
use validator::Validate;

pub fn work_center_routes() -> Router<AppState> {
    Router::new().route("/", post(create_work_center).get(list_work_centers))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWorkCenterRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub cost_per_hour: f64,
    #[validate(custom = "validate_positive_quantity")]
    pub capacity: Option<f64>,
}

async fn create_work_center(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkCenterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let center = state
        .services
        .catalog
        .create_work_center(CreateWorkCenterInput {
            name: payload.name,
            description: payload.description,
            cost_per_hour: payload.cost_per_hour,
            capacity: payload.capacity,
        })
        .await
        .map_err(map_service_error)?;
    Ok(created_response(center))
}

async fn list_work_centers(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let centers = state
        .services
        .catalog
        .list_work_centers()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(centers))
}
