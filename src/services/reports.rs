use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        manufacturing_order::{self, Entity as ManufacturingOrderEntity, ManufacturingOrderState},
        product::{self, Entity as ProductEntity},
        work_order::{self, Entity as WorkOrderEntity},
    },
    errors::ServiceError,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductionReportQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionReportRow {
    pub mo_id: Uuid,
    pub reference: String,
    pub product_name: String,
    pub quantity_planned: f64,
    pub quantity_produced: f64,
    pub state: ManufacturingOrderState,
    /// Minutes across all work orders, actual where recorded
    pub total_time: f64,
    /// Percentage of the planned quantity actually produced
    pub efficiency: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Produced over planned as a percentage; zero when nothing was planned.
pub fn efficiency(quantity_produced: f64, quantity_planned: f64) -> f64 {
    if quantity_planned > 0.0 {
        quantity_produced / quantity_planned * 100.0
    } else {
        0.0
    }
}

pub fn total_work_time(work_orders: &[work_order::Model]) -> f64 {
    work_orders.iter().map(work_order::Model::effective_time).sum()
}

/// Read-only production reporting
#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// One row per manufacturing order created in the window, newest first
    #[instrument(skip(self))]
    pub async fn production_report(
        &self,
        query: ProductionReportQuery,
    ) -> Result<Vec<ProductionReportRow>, ServiceError> {
        let db = &*self.db;

        let mut select =
            ManufacturingOrderEntity::find().order_by_desc(manufacturing_order::Column::CreatedAt);
        if let Some(from) = query.from {
            select = select.filter(manufacturing_order::Column::CreatedAt.gte(from));
        }
        if let Some(to) = query.to {
            select = select.filter(manufacturing_order::Column::CreatedAt.lte(to));
        }
        let orders = select.all(db).await.map_err(ServiceError::db_error)?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let mo_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let product_ids: Vec<Uuid> = orders.iter().map(|o| o.product_id).collect();

        let products: HashMap<Uuid, String> = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        let mut work_orders: HashMap<Uuid, Vec<work_order::Model>> = HashMap::new();
        for wo in WorkOrderEntity::find()
            .filter(work_order::Column::ManufacturingOrderId.is_in(mo_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            work_orders.entry(wo.manufacturing_order_id).or_default().push(wo);
        }

        let rows: Vec<ProductionReportRow> = orders
            .into_iter()
            .map(|order| {
                let total_time = work_orders
                    .get(&order.id)
                    .map(|wos| total_work_time(wos))
                    .unwrap_or(0.0);
                ProductionReportRow {
                    mo_id: order.id,
                    product_name: products.get(&order.product_id).cloned().unwrap_or_default(),
                    efficiency: efficiency(order.quantity_produced, order.quantity_to_produce),
                    quantity_planned: order.quantity_to_produce,
                    quantity_produced: order.quantity_produced,
                    state: order.state,
                    total_time,
                    created_at: order.created_at,
                    started_at: order.started_at,
                    completed_at: order.completed_at,
                    reference: order.reference,
                }
            })
            .collect();

        info!(rows = rows.len(), "Production report generated");
        Ok(rows)
    }
}
