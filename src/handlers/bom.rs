use super::common::{
    created_response, map_service_error, success_response, validate_input,
    validate_non_negative, validate_positive_quantity,
};
use crate::{
    errors::ApiError,
    handlers::AppState,
    services::bom::{CreateBomInput, CreateBomLineInput},
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for BOM endpoints
pub fn bom_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_bom).get(list_boms))
        .route("/:id", get(get_bom))
        .route("/:id/explode", get(explode_bom))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBomRequest {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[validate(custom = "validate_positive_quantity")]
    pub quantity: Option<f64>,
    #[validate(length(min = 1))]
    pub lines: Vec<BomLineRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BomLineRequest {
    pub product_id: Uuid,
    pub quantity: f64,
    #[serde(default)]
    pub operation_time: f64,
}

#[derive(Debug, Deserialize)]
pub struct ListBomsQuery {
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExplodeQuery {
    #[validate(custom = "validate_positive_quantity")]
    pub quantity: f64,
}

async fn create_bom(
    State(state): State<AppState>,
    Json(payload): Json<CreateBomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    for line in &payload.lines {
        validate_positive_quantity(line.quantity)
            .and_then(|_| validate_non_negative(line.operation_time))
            .map_err(|e| ApiError::ValidationError(format!("Invalid BOM line: {}", e)))?;
    }

    let definition = state
        .services
        .boms
        .create_bom(CreateBomInput {
            product_id: payload.product_id,
            name: payload.name,
            description: payload.description,
            quantity: payload.quantity,
            lines: payload
                .lines
                .into_iter()
                .map(|line| CreateBomLineInput {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    operation_time: line.operation_time,
                })
                .collect(),
        })
        .await
        .map_err(map_service_error)?;

    info!("BOM created: {}", definition.bom.id);
    Ok(created_response(definition))
}

async fn list_boms(
    State(state): State<AppState>,
    Query(query): Query<ListBomsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let boms = state
        .services
        .boms
        .list_boms(query.product_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(boms))
}

async fn get_bom(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let definition = state
        .services
        .boms
        .get_bom(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(definition))
}

async fn explode_bom(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ExplodeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&query)?;
    let components = state
        .services
        .boms
        .explode(id, query.quantity)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(components))
}
