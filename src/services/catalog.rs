use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        product::{self, Entity as ProductEntity},
        work_center::{self, Entity as WorkCenterEntity},
    },
    errors::ServiceError,
    services::bom::{BomDefinition, BomService, CreateBomInput, CreateBomLineInput},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductInput {
    pub name: String,
    pub description: Option<String>,
    pub unit_of_measure: Option<String>,
    /// Becomes both the opening and the current stock
    #[serde(default)]
    pub initial_stock: f64,
    #[serde(default)]
    pub min_stock: f64,
    #[serde(default)]
    pub cost_price: f64,
    #[serde(default)]
    pub is_raw_material: bool,
}

/// Master-data edit; omitted fields keep their value. Stock levels are not editable here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProductInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit_of_measure: Option<String>,
    pub min_stock: Option<f64>,
    pub cost_price: Option<f64>,
    pub is_raw_material: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkCenterInput {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub cost_per_hour: f64,
    pub capacity: Option<f64>,
}

/// Products, work center and BOM registered by [`CatalogService::seed_demo_catalog`].
#[derive(Debug, Clone)]
pub struct DemoCatalog {
    pub wooden_legs: product::Model,
    pub wooden_top: product::Model,
    pub screws: product::Model,
    pub varnish: product::Model,
    pub wooden_table: product::Model,
    pub work_center: work_center::Model,
    pub table_bom: BomDefinition,
}

/// Master data: products and work centers
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    boms: BomService,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, boms: BomService) -> Self {
        Self { db, boms }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: CreateProductInput) -> Result<product::Model, ServiceError> {
        if input.name.trim().is_empty() {
            return Err(ServiceError::ValidationError("Product name cannot be empty".to_string()));
        }
        for (field, value) in [
            ("initial_stock", input.initial_stock),
            ("min_stock", input.min_stock),
            ("cost_price", input.cost_price),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ServiceError::ValidationError(format!(
                    "{} cannot be negative, got: {}",
                    field, value
                )));
            }
        }

        let product = product::ActiveModel {
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            unit_of_measure: Set(input.unit_of_measure.unwrap_or_else(|| "Units".to_string())),
            current_stock: Set(input.initial_stock),
            opening_stock: Set(input.initial_stock),
            min_stock: Set(input.min_stock),
            cost_price: Set(input.cost_price),
            is_raw_material: Set(input.is_raw_material),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        counter!("catalog.products.created", 1);
        info!(product_id = %product.id, "Product created");
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Edits product master data. `current_stock` and `opening_stock` stay as the
    /// ledger left them, so reconciliation is unaffected.
    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<product::Model, ServiceError> {
        if let Some(name) = &input.name {
            if name.trim().is_empty() {
                return Err(ServiceError::ValidationError("Product name cannot be empty".to_string()));
            }
        }
        if let Some(unit) = &input.unit_of_measure {
            if unit.trim().is_empty() {
                return Err(ServiceError::ValidationError(
                    "Unit of measure cannot be empty".to_string(),
                ));
            }
        }
        for (field, value) in [("min_stock", input.min_stock), ("cost_price", input.cost_price)] {
            if let Some(value) = value {
                if !(value.is_finite() && value >= 0.0) {
                    return Err(ServiceError::ValidationError(format!(
                        "{} cannot be negative, got: {}",
                        field, value
                    )));
                }
            }
        }

        let mut product = self.get_product(product_id).await?.into_active_model();
        if let Some(name) = input.name {
            product.name = Set(name.trim().to_string());
        }
        if let Some(description) = input.description {
            product.description = Set(Some(description));
        }
        if let Some(unit) = input.unit_of_measure {
            product.unit_of_measure = Set(unit.trim().to_string());
        }
        if let Some(min_stock) = input.min_stock {
            product.min_stock = Set(min_stock);
        }
        if let Some(cost_price) = input.cost_price {
            product.cost_price = Set(cost_price);
        }
        if let Some(is_raw_material) = input.is_raw_material {
            product.is_raw_material = Set(is_raw_material);
        }

        let updated = product
            .update(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        info!(product_id = %updated.id, "Product updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        raw_materials_only: Option<bool>,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let mut query = ProductEntity::find().order_by_asc(product::Column::Name);
        if let Some(raw) = raw_materials_only {
            query = query.filter(product::Column::IsRawMaterial.eq(raw));
        }
        query.all(&*self.db).await.map_err(ServiceError::db_error)
    }

    /// Products whose stock is at or below their reorder threshold
    #[instrument(skip(self))]
    pub async fn low_stock_products(&self) -> Result<Vec<product::Model>, ServiceError> {
        ProductEntity::find()
            .filter(Expr::col(product::Column::CurrentStock).lte(Expr::col(product::Column::MinStock)))
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_work_center(
        &self,
        input: CreateWorkCenterInput,
    ) -> Result<work_center::Model, ServiceError> {
        if input.name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Work center name cannot be empty".to_string(),
            ));
        }
        if !(input.cost_per_hour.is_finite() && input.cost_per_hour >= 0.0) {
            return Err(ServiceError::ValidationError(format!(
                "Cost per hour cannot be negative, got: {}",
                input.cost_per_hour
            )));
        }
        let capacity = input.capacity.unwrap_or(1.0);
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(ServiceError::ValidationError(format!(
                "Capacity must be positive, got: {}",
                capacity
            )));
        }

        let center = work_center::ActiveModel {
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            cost_per_hour: Set(input.cost_per_hour),
            capacity: Set(capacity),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(work_center_id = %center.id, "Work center created");
        Ok(center)
    }

    #[instrument(skip(self))]
    pub async fn list_work_centers(&self) -> Result<Vec<work_center::Model>, ServiceError> {
        WorkCenterEntity::find()
            .order_by_asc(work_center::Column::Name)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Registers the wooden table demo catalog on an empty database.
    /// Returns `None` when products already exist.
    #[instrument(skip(self))]
    pub async fn seed_demo_catalog(&self) -> Result<Option<DemoCatalog>, ServiceError> {
        let existing = ProductEntity::find()
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if existing > 0 {
            info!(existing, "Catalog already populated, skipping demo seed");
            return Ok(None);
        }

        let raw = |name: &str, unit: &str, stock: f64, min: f64, cost: f64| CreateProductInput {
            name: name.to_string(),
            description: None,
            unit_of_measure: Some(unit.to_string()),
            initial_stock: stock,
            min_stock: min,
            cost_price: cost,
            is_raw_material: true,
        };

        let wooden_legs = self.create_product(raw("Wooden Legs", "Pieces", 100.0, 20.0, 5.0)).await?;
        let wooden_top = self.create_product(raw("Wooden Top", "Pieces", 50.0, 10.0, 25.0)).await?;
        let screws = self.create_product(raw("Screws", "Pieces", 1000.0, 100.0, 0.1)).await?;
        let varnish = self.create_product(raw("Varnish Bottle", "Bottles", 30.0, 5.0, 8.0)).await?;
        let wooden_table = self
            .create_product(CreateProductInput {
                name: "Wooden Table".to_string(),
                description: None,
                unit_of_measure: Some("Units".to_string()),
                initial_stock: 0.0,
                min_stock: 5.0,
                cost_price: 100.0,
                is_raw_material: false,
            })
            .await?;

        let work_center = self
            .create_work_center(CreateWorkCenterInput {
                name: "Main Assembly Line".to_string(),
                description: Some("Primary assembly line for manufacturing".to_string()),
                cost_per_hour: 50.0,
                capacity: Some(1.0),
            })
            .await?;

        let table_bom = self
            .boms
            .create_bom(CreateBomInput {
                product_id: wooden_table.id,
                name: "Wooden Table".to_string(),
                description: Some("Four legs and a top".to_string()),
                quantity: Some(1.0),
                lines: vec![
                    CreateBomLineInput {
                        product_id: wooden_legs.id,
                        quantity: 4.0,
                        operation_time: 10.0,
                    },
                    CreateBomLineInput {
                        product_id: wooden_top.id,
                        quantity: 1.0,
                        operation_time: 30.0,
                    },
                ],
            })
            .await?;

        info!(work_center_id = %work_center.id, bom_id = %table_bom.bom.id, "Demo catalog seeded");

        Ok(Some(DemoCatalog {
            wooden_legs,
            wooden_top,
            screws,
            varnish,
            wooden_table,
            work_center,
            table_bom,
        }))
    }
}
