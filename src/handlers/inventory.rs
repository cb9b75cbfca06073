use super::common::{
    created_response, map_service_error, success_response, validate_input,
    validate_non_negative, validate_positive_quantity,
};
use crate::{
    entities::MovementType,
    errors::ApiError,
    handlers::AppState,
    services::{
        catalog::{CreateProductInput, UpdateProductInput},
        stock_ledger::{MovementFilter, PostMovementCommand},
    },
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Routes for the stock ledger
pub fn stock_movement_routes() -> Router<AppState> {
    Router::new().route("/", post(post_stock_movement).get(list_stock_movements))
}

/// Routes for products and their stock position
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/low-stock", get(low_stock_products))
        .route("/:id", get(get_product).put(update_product))
        .route("/:id/reconciliation", get(reconcile_product))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PostStockMovementRequest {
    pub product_id: Uuid,
    #[validate(custom = "validate_positive_quantity")]
    pub quantity: f64,
    pub movement_type: MovementType,
    #[validate(length(max = 100))]
    pub reference: Option<String>,
    #[validate(custom = "validate_non_negative")]
    pub unit_cost: Option<f64>,
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct StockMovementQuery {
    pub product_id: Option<Uuid>,
    pub manufacturing_order_id: Option<Uuid>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub unit_of_measure: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub initial_stock: f64,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub min_stock: f64,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub cost_price: f64,
    #[serde(default)]
    pub is_raw_material: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub unit_of_measure: Option<String>,
    #[validate(custom = "validate_non_negative")]
    pub min_stock: Option<f64>,
    #[validate(custom = "validate_non_negative")]
    pub cost_price: Option<f64>,
    pub is_raw_material: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub raw_material: Option<bool>,
}

async fn post_stock_movement(
    State(state): State<AppState>,
    Json(payload): Json<PostStockMovementRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let movement = state
        .services
        .stock_ledger
        .post(PostMovementCommand {
            product_id: payload.product_id,
            quantity: payload.quantity,
            movement_type: payload.movement_type,
            reference: payload.reference,
            unit_cost: payload.unit_cost,
            manufacturing_order_id: None,
            actor_id: payload.actor_id,
        })
        .await
        .map_err(map_service_error)?;

    info!("Stock movement posted: {}", movement.id);
    Ok(created_response(movement))
}

async fn list_stock_movements(
    State(state): State<AppState>,
    Query(query): Query<StockMovementQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let movements = state
        .services
        .stock_ledger
        .list_movements(MovementFilter {
            product_id: query.product_id,
            manufacturing_order_id: query.manufacturing_order_id,
            limit: query.limit,
        })
        .await
        .map_err(map_service_error)?;
    Ok(success_response(movements))
}

async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let product = state
        .services
        .catalog
        .create_product(CreateProductInput {
            name: payload.name,
            description: payload.description,
            unit_of_measure: payload.unit_of_measure,
            initial_stock: payload.initial_stock,
            min_stock: payload.min_stock,
            cost_price: payload.cost_price,
            is_raw_material: payload.is_raw_material,
        })
        .await
        .map_err(map_service_error)?;
    Ok(created_response(product))
}

async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let products = state
        .services
        .catalog
        .list_products(query.raw_material)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(products))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .get_product(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(product))
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let product = state
        .services
        .catalog
        .update_product(
            id,
            UpdateProductInput {
                name: payload.name,
                description: payload.description,
                unit_of_measure: payload.unit_of_measure,
                min_stock: payload.min_stock,
                cost_price: payload.cost_price,
                is_raw_material: payload.is_raw_material,
            },
        )
        .await
        .map_err(map_service_error)?;

    info!("Product updated: {}", product.id);
    Ok(success_response(product))
}

async fn low_stock_products(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let products = state
        .services
        .catalog
        .low_stock_products()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(products))
}

async fn reconcile_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .services
        .stock_ledger
        .reconcile(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(report))
}
