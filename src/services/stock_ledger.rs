use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::ManufacturingSettings,
    db,
    entities::{
        product::{self, Entity as ProductEntity},
        stock_movement::{self, Entity as StockMovementEntity, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::bom::ComponentRequirement,
};

/// Request to append one movement to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMovementCommand {
    pub product_id: Uuid,
    pub quantity: f64,
    pub movement_type: MovementType,
    pub reference: Option<String>,
    /// Defaults to the product's cost price
    pub unit_cost: Option<f64>,
    pub manufacturing_order_id: Option<Uuid>,
    pub actor_id: Uuid,
}

/// A movement together with the product row as it stands after posting.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMovement {
    pub movement: stock_movement::Model,
    pub product: product::Model,
}

/// Ledger check of `current == opening + in + production - out - consumption`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub product_id: Uuid,
    pub opening_stock: f64,
    pub total_in: f64,
    pub total_out: f64,
    pub expected_stock: f64,
    pub current_stock: f64,
    pub movement_count: usize,
    pub balanced: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<Uuid>,
    pub manufacturing_order_id: Option<Uuid>,
    pub limit: Option<u64>,
}

const RECONCILIATION_TOLERANCE: f64 = 1e-6;

/// Append-only stock ledger and the single writer of `products.current_stock`.
#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    settings: ManufacturingSettings,
}

impl StockLedger {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<EventSender>,
        settings: ManufacturingSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            settings,
        }
    }

    /// Posts a single movement and updates the product's stock atomically
    #[instrument(skip(self, command), fields(product_id = %command.product_id, movement_type = %command.movement_type, quantity = command.quantity))]
    pub async fn post(
        &self,
        command: PostMovementCommand,
    ) -> Result<stock_movement::Model, ServiceError> {
        validate_quantity(command.quantity)?;
        if let Some(unit_cost) = command.unit_cost {
            if !(unit_cost.is_finite() && unit_cost >= 0.0) {
                return Err(ServiceError::ValidationError(format!(
                    "Unit cost cannot be negative, got: {}",
                    unit_cost
                )));
            }
        }

        let db = self.db.clone();
        let posted = db::with_retry(
            "stock_ledger.post",
            self.settings.lock_retry_attempts,
            self.settings.lock_retry_backoff,
            || {
                let db = db.clone();
                let command = command.clone();
                async move {
                    let txn = db::begin_write(&db).await?;
                    let result = post_in_txn(&txn, &command).await;
                    db::finish_transaction(txn, result).await
                }
            },
        )
        .await?;

        info!(
            movement_id = %posted.movement.id,
            new_stock = posted.product.current_stock,
            "Stock movement posted"
        );
        self.emit_posted(std::slice::from_ref(&posted)).await;

        Ok(posted.movement)
    }

    /// Draws every requirement from stock or nothing at all
    #[instrument(skip(self, requirements), fields(requirements = requirements.len()))]
    pub async fn consume_batch(
        &self,
        manufacturing_order_id: Option<Uuid>,
        reference: Option<String>,
        requirements: Vec<ComponentRequirement>,
        actor_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let db = self.db.clone();
        let posted = db::with_retry(
            "stock_ledger.consume_batch",
            self.settings.lock_retry_attempts,
            self.settings.lock_retry_backoff,
            || {
                let db = db.clone();
                let reference = reference.clone();
                let requirements = requirements.clone();
                async move {
                    let txn = db::begin_write(&db).await?;
                    let result = consume_batch_in_txn(
                        &txn,
                        manufacturing_order_id,
                        reference.as_deref(),
                        &requirements,
                        actor_id,
                    )
                    .await;
                    db::finish_transaction(txn, result).await
                }
            },
        )
        .await?;

        self.emit_posted(&posted).await;
        Ok(posted.into_iter().map(|p| p.movement).collect())
    }

    /// Recomputes a product's stock from its movement log
    #[instrument(skip(self))]
    pub async fn reconcile(&self, product_id: Uuid) -> Result<Reconciliation, ServiceError> {
        let db = &*self.db;
        let product = ProductEntity::find_by_id(product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let movements = StockMovementEntity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let report = reconcile_movements(&product, &movements);
        if !report.balanced {
            error!(
                product_id = %product_id,
                expected = report.expected_stock,
                current = report.current_stock,
                "Stock ledger out of balance"
            );
            counter!("stock.reconciliation.mismatch", 1);
        }
        Ok(report)
    }

    /// Lists movements newest first
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        filter: MovementFilter,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let mut query = StockMovementEntity::find().order_by_desc(stock_movement::Column::CreatedAt);
        if let Some(product_id) = filter.product_id {
            query = query.filter(stock_movement::Column::ProductId.eq(product_id));
        }
        if let Some(mo_id) = filter.manufacturing_order_id {
            query = query.filter(stock_movement::Column::ManufacturingOrderId.eq(mo_id));
        }
        query
            .limit(filter.limit.unwrap_or(100).min(1000))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Publishes stock events for movements that have already committed
    pub(crate) async fn emit_posted(&self, posted: &[PostedMovement]) {
        for item in posted {
            counter!(
                "stock.movements.posted",
                1,
                "type" => item.movement.movement_type.to_string()
            );
            histogram!("stock.movement.quantity", item.movement.quantity);

            let low_stock = !item.movement.movement_type.is_increase() && item.product.is_below_minimum();
            if low_stock {
                warn!(
                    product_id = %item.product.id,
                    current_stock = item.product.current_stock,
                    min_stock = item.product.min_stock,
                    "Stock fell to reorder threshold"
                );
            }

            let Some(sender) = &self.event_sender else {
                continue;
            };
            sender
                .send_or_log(Event::StockMoved {
                    movement_id: item.movement.id,
                    product_id: item.product.id,
                    movement_type: item.movement.movement_type,
                    quantity: item.movement.quantity,
                    new_stock: item.product.current_stock,
                })
                .await;
            if low_stock {
                sender
                    .send_or_log(Event::LowStockDetected {
                        product_id: item.product.id,
                        current_stock: item.product.current_stock,
                        min_stock: item.product.min_stock,
                    })
                    .await;
            }
        }
    }
}

fn validate_quantity(quantity: f64) -> Result<(), ServiceError> {
    if quantity.is_finite() && quantity > 0.0 {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "Movement quantity must be positive, got: {}",
            quantity
        )))
    }
}

/// Pure reconciliation of a product against its movements.
pub fn reconcile_movements(
    product: &product::Model,
    movements: &[stock_movement::Model],
) -> Reconciliation {
    let (total_in, total_out) = movements.iter().fold((0.0, 0.0), |(i, o), m| {
        if m.movement_type.is_increase() {
            (i + m.quantity, o)
        } else {
            (i, o + m.quantity)
        }
    });
    let expected_stock = product.opening_stock + total_in - total_out;

    Reconciliation {
        product_id: product.id,
        opening_stock: product.opening_stock,
        total_in,
        total_out,
        expected_stock,
        current_stock: product.current_stock,
        movement_count: movements.len(),
        balanced: (expected_stock - product.current_stock).abs() <= RECONCILIATION_TOLERANCE,
    }
}

/// Applies a signed stock change. Decreases only succeed while enough stock
/// remains, so concurrent writers can never drive stock negative.
async fn apply_stock_change(
    txn: &DatabaseTransaction,
    product: &product::Model,
    movement_type: MovementType,
    quantity: f64,
) -> Result<(), ServiceError> {
    let mut update = ProductEntity::update_many()
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product.id));

    update = if movement_type.is_increase() {
        update.col_expr(
            product::Column::CurrentStock,
            Expr::col(product::Column::CurrentStock).add(quantity),
        )
    } else {
        update
            .col_expr(
                product::Column::CurrentStock,
                Expr::col(product::Column::CurrentStock).sub(quantity),
            )
            .filter(product::Column::CurrentStock.gte(quantity))
    };

    let result = update.exec(txn).await.map_err(ServiceError::db_error)?;
    if result.rows_affected == 0 {
        let available = current_stock(txn, product.id).await?;
        return Err(ServiceError::InsufficientStock {
            product_id: product.id,
            product_name: product.name.clone(),
            required: quantity,
            available,
        });
    }
    Ok(())
}

async fn current_stock<C: ConnectionTrait>(conn: &C, product_id: Uuid) -> Result<f64, ServiceError> {
    ProductEntity::find_by_id(product_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .map(|p| p.current_stock)
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

async fn insert_movement(
    txn: &DatabaseTransaction,
    product: &product::Model,
    command: &PostMovementCommand,
) -> Result<PostedMovement, ServiceError> {
    let movement = stock_movement::ActiveModel {
        product_id: Set(product.id),
        movement_type: Set(command.movement_type),
        quantity: Set(command.quantity),
        unit_cost: Set(command.unit_cost.unwrap_or(product.cost_price)),
        reference: Set(command.reference.clone()),
        manufacturing_order_id: Set(command.manufacturing_order_id),
        created_by: Set(command.actor_id),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let product = ProductEntity::find_by_id(product.id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product.id)))?;

    Ok(PostedMovement { movement, product })
}

/// Posts one movement inside the caller's transaction.
pub(crate) async fn post_in_txn(
    txn: &DatabaseTransaction,
    command: &PostMovementCommand,
) -> Result<PostedMovement, ServiceError> {
    validate_quantity(command.quantity)?;

    let product = ProductEntity::find_by_id(command.product_id)
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", command.product_id))
        })?;

    apply_stock_change(txn, &product, command.movement_type, command.quantity).await?;
    insert_movement(txn, &product, command).await
}

/// Consumes every requirement inside the caller's transaction.
///
/// Rows are locked in id order, all availability is checked before the first
/// write, and each decrement is guarded again at write time. Any shortfall
/// returns `InsufficientStock`; the caller must then roll back.
pub(crate) async fn consume_batch_in_txn(
    txn: &DatabaseTransaction,
    manufacturing_order_id: Option<Uuid>,
    reference: Option<&str>,
    requirements: &[ComponentRequirement],
    actor_id: Uuid,
) -> Result<Vec<PostedMovement>, ServiceError> {
    for requirement in requirements {
        validate_quantity(requirement.quantity)?;
    }

    let mut ids: Vec<Uuid> = requirements.iter().map(|r| r.product_id).collect();
    ids.sort();
    ids.dedup();
    if ids.len() != requirements.len() {
        return Err(ServiceError::ValidationError(
            "Each product may appear only once per consumption batch".to_string(),
        ));
    }

    let locked: HashMap<Uuid, product::Model> = ProductEntity::find()
        .filter(product::Column::Id.is_in(ids.clone()))
        .order_by_asc(product::Column::Id)
        .lock_exclusive()
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    for requirement in requirements {
        let product = locked.get(&requirement.product_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", requirement.product_id))
        })?;
        if product.current_stock < requirement.quantity {
            warn!(
                product_id = %product.id,
                required = requirement.quantity,
                available = product.current_stock,
                "Insufficient stock for consumption batch"
            );
            counter!("stock.consumption.rejected", 1);
            return Err(ServiceError::InsufficientStock {
                product_id: product.id,
                product_name: product.name.clone(),
                required: requirement.quantity,
                available: product.current_stock,
            });
        }
    }

    let mut posted = Vec::with_capacity(requirements.len());
    for id in &ids {
        let requirement = requirements
            .iter()
            .find(|r| r.product_id == *id)
            .ok_or_else(|| ServiceError::InternalError(format!("Lost requirement for {}", id)))?;
        let product = locked
            .get(id)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

        let command = PostMovementCommand {
            product_id: product.id,
            quantity: requirement.quantity,
            movement_type: MovementType::Consumption,
            reference: reference.map(str::to_string),
            unit_cost: None,
            manufacturing_order_id,
            actor_id,
        };
        apply_stock_change(txn, product, MovementType::Consumption, requirement.quantity).await?;
        posted.push(insert_movement(txn, product, &command).await?);
    }

    Ok(posted)
}

/// Movements already recorded against a manufacturing order.
pub(crate) async fn movements_for_order<C: ConnectionTrait>(
    conn: &C,
    manufacturing_order_id: Uuid,
) -> Result<Vec<stock_movement::Model>, ServiceError> {
    StockMovementEntity::find()
        .filter(stock_movement::Column::ManufacturingOrderId.eq(manufacturing_order_id))
        .order_by_asc(stock_movement::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}
