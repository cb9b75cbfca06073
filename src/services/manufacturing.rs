use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::ManufacturingSettings,
    db,
    entities::{
        manufacturing_order::{self, Entity as ManufacturingOrderEntity, ManufacturingOrderState},
        product::Entity as ProductEntity,
        stock_movement::{self, MovementType},
        work_center::Entity as WorkCenterEntity,
        work_order::{self, Entity as WorkOrderEntity, WorkOrderState},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        bom::{self, ResolvedComponent},
        reference::{self, ReferenceGenerator},
        stock_ledger::{self, PostMovementCommand, PostedMovement, StockLedger},
    },
};

const ENTITY: &str = "manufacturing order";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateManufacturingOrderInput {
    pub product_id: Uuid,
    pub bom_id: Uuid,
    pub quantity_to_produce: f64,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<Uuid>,
    /// Overrides the configured default work center for spawned work orders
    pub work_center_id: Option<Uuid>,
    pub actor_id: Uuid,
}

/// A newly planned order together with the work orders spawned from its BOM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedManufacturingOrder {
    pub order: manufacturing_order::Model,
    pub work_orders: Vec<work_order::Model>,
}

/// Result of a state change that touched the stock ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManufacturingOrderTransition {
    pub order: manufacturing_order::Model,
    pub movements: Vec<stock_movement::Model>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManufacturingOrderFilter {
    pub state: Option<ManufacturingOrderState>,
    pub product_id: Option<Uuid>,
    pub limit: Option<u64>,
}

enum CreateAttempt {
    Planned(PlannedManufacturingOrder),
    DuplicateReference,
}

/// Drives manufacturing orders through `planned -> in_progress -> done`,
/// consuming components on confirm and booking output on completion.
#[derive(Clone)]
pub struct ManufacturingOrderService {
    db: Arc<DatabaseConnection>,
    ledger: StockLedger,
    event_sender: Option<EventSender>,
    settings: ManufacturingSettings,
    reference_generator: ReferenceGenerator,
}

impl ManufacturingOrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: StockLedger,
        event_sender: Option<EventSender>,
        settings: ManufacturingSettings,
    ) -> Self {
        Self {
            db,
            ledger,
            event_sender,
            settings,
            reference_generator: reference::default_generator(),
        }
    }

    /// Replaces the source of order references
    pub fn with_reference_generator(mut self, generator: ReferenceGenerator) -> Self {
        self.reference_generator = generator;
        self
    }

    /// Plans a new order and spawns one work order per timed BOM line
    #[instrument(skip(self, input), fields(product_id = %input.product_id, bom_id = %input.bom_id, quantity = input.quantity_to_produce))]
    pub async fn create_manufacturing_order(
        &self,
        input: CreateManufacturingOrderInput,
    ) -> Result<PlannedManufacturingOrder, ServiceError> {
        if !(input.quantity_to_produce.is_finite() && input.quantity_to_produce > 0.0) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity to produce must be positive, got: {}",
                input.quantity_to_produce
            )));
        }

        let attempts = self.settings.reference_retry_attempts.max(1);
        for attempt in 1..=attempts {
            let order_reference = (self.reference_generator)(&self.settings.reference_prefix);
            let input_ref = &input;
            let reference_ref = order_reference.as_str();

            let outcome = db::with_retry(
                "manufacturing_order.create",
                self.settings.lock_retry_attempts,
                self.settings.lock_retry_backoff,
                move || async move {
                    let txn = db::begin_write(&self.db).await?;
                    match self.create_in_txn(&txn, input_ref, reference_ref).await {
                        Ok(CreateAttempt::DuplicateReference) => {
                            txn.rollback().await.map_err(ServiceError::db_error)?;
                            Ok(CreateAttempt::DuplicateReference)
                        }
                        result => db::finish_transaction(txn, result).await,
                    }
                },
            )
            .await?;

            match outcome {
                CreateAttempt::Planned(planned) => {
                    counter!("manufacturing.orders.created", 1);
                    info!(
                        mo_id = %planned.order.id,
                        reference = %planned.order.reference,
                        work_orders = planned.work_orders.len(),
                        "Manufacturing order planned"
                    );
                    self.emit(Event::ManufacturingOrderCreated {
                        mo_id: planned.order.id,
                        reference: planned.order.reference.clone(),
                        work_orders: planned.work_orders.len(),
                    })
                    .await;
                    return Ok(planned);
                }
                CreateAttempt::DuplicateReference => {
                    counter!("manufacturing.orders.reference_collisions", 1);
                    warn!(attempt, reference = %order_reference, "Reference already taken, regenerating");
                }
            }
        }

        Err(ServiceError::ConcurrencyConflict(format!(
            "Could not allocate a unique manufacturing order reference after {} attempt(s)",
            attempts
        )))
    }

    async fn create_in_txn(
        &self,
        txn: &DatabaseTransaction,
        input: &CreateManufacturingOrderInput,
        order_reference: &str,
    ) -> Result<CreateAttempt, ServiceError> {
        ProductEntity::find_by_id(input.product_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", input.product_id)))?;

        let definition = bom::load_definition(txn, input.bom_id).await?;
        if definition.bom.product_id != input.product_id {
            return Err(ServiceError::ValidationError(format!(
                "BOM {} does not produce product {}",
                input.bom_id, input.product_id
            )));
        }

        let components = bom::resolve(&definition.lines, input.quantity_to_produce);
        let timed: Vec<&ResolvedComponent> =
            components.iter().filter(|c| c.spawns_work_order()).collect();

        let work_center_id = if timed.is_empty() {
            None
        } else {
            let id = input
                .work_center_id
                .or(self.settings.default_work_center_id)
                .ok_or_else(|| {
                    ServiceError::ValidationError(
                        "A work center is required: none given and no default configured".to_string(),
                    )
                })?;
            WorkCenterEntity::find_by_id(id)
                .one(txn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::NotFound(format!("Work center {} not found", id)))?;
            Some(id)
        };

        let inserted = manufacturing_order::ActiveModel {
            reference: Set(order_reference.to_string()),
            product_id: Set(input.product_id),
            bom_id: Set(input.bom_id),
            quantity_to_produce: Set(input.quantity_to_produce),
            state: Set(ManufacturingOrderState::Planned),
            scheduled_date: Set(input.scheduled_date),
            assignee_id: Set(input.assignee_id),
            created_by: Set(Some(input.actor_id)),
            ..Default::default()
        }
        .insert(txn)
        .await;

        let order = match inserted {
            Ok(order) => order,
            Err(err) if db::is_unique_violation(&err) => return Ok(CreateAttempt::DuplicateReference),
            Err(err) => return Err(ServiceError::db_error(err)),
        };

        let mut work_orders = Vec::with_capacity(timed.len());
        if let Some(work_center_id) = work_center_id {
            for component in timed {
                let wo = work_order::ActiveModel {
                    manufacturing_order_id: Set(order.id),
                    work_center_id: Set(work_center_id),
                    operation_name: Set(component.operation_name()),
                    estimated_time: Set(component.operation_time),
                    state: Set(WorkOrderState::Pending),
                    assignee_id: Set(input.assignee_id),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(ServiceError::db_error)?;
                work_orders.push(wo);
            }
        }

        Ok(CreateAttempt::Planned(PlannedManufacturingOrder { order, work_orders }))
    }

    /// Moves a planned order into production, consuming every component.
    /// A shortfall leaves the order planned and the ledger untouched.
    #[instrument(skip(self))]
    pub async fn confirm_manufacturing_order(
        &self,
        mo_id: Uuid,
        actor_id: Uuid,
    ) -> Result<ManufacturingOrderTransition, ServiceError> {
        let start = Instant::now();
        let (order, posted) = db::with_retry(
            "manufacturing_order.confirm",
            self.settings.lock_retry_attempts,
            self.settings.lock_retry_backoff,
            move || async move {
                let txn = db::begin_write(&self.db).await?;
                let result = confirm_in_txn(&txn, mo_id, actor_id).await;
                db::finish_transaction(txn, result).await
            },
        )
        .await
        .map_err(|err| {
            if let ServiceError::InsufficientStock { .. } = err {
                counter!("manufacturing.orders.confirm_rejected", 1);
            }
            err
        })?;

        counter!("manufacturing.orders.confirmed", 1);
        histogram!("manufacturing.orders.confirm_duration", start.elapsed());
        info!(
            mo_id = %order.id,
            reference = %order.reference,
            movements = posted.len(),
            "Manufacturing order confirmed"
        );

        self.ledger.emit_posted(&posted).await;
        self.emit(Event::ManufacturingOrderConfirmed {
            mo_id: order.id,
            reference: order.reference.clone(),
            movements: posted.len(),
        })
        .await;

        Ok(ManufacturingOrderTransition {
            order,
            movements: posted.into_iter().map(|p| p.movement).collect(),
        })
    }

    /// Finishes production and books the output into stock
    #[instrument(skip(self))]
    pub async fn complete_manufacturing_order(
        &self,
        mo_id: Uuid,
        quantity_produced: Option<f64>,
        actor_id: Uuid,
    ) -> Result<ManufacturingOrderTransition, ServiceError> {
        if let Some(quantity) = quantity_produced {
            if !(quantity.is_finite() && quantity > 0.0) {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity produced must be positive, got: {}",
                    quantity
                )));
            }
        }

        let (order, posted) = db::with_retry(
            "manufacturing_order.complete",
            self.settings.lock_retry_attempts,
            self.settings.lock_retry_backoff,
            move || async move {
                let txn = db::begin_write(&self.db).await?;
                let result = complete_in_txn(&txn, mo_id, quantity_produced, actor_id).await;
                db::finish_transaction(txn, result).await
            },
        )
        .await?;

        counter!("manufacturing.orders.completed", 1);
        histogram!("manufacturing.orders.quantity_produced", order.quantity_produced);
        info!(
            mo_id = %order.id,
            reference = %order.reference,
            quantity_produced = order.quantity_produced,
            "Manufacturing order completed"
        );

        self.ledger.emit_posted(std::slice::from_ref(&posted)).await;
        self.emit(Event::ManufacturingOrderCompleted {
            mo_id: order.id,
            reference: order.reference.clone(),
            quantity_produced: order.quantity_produced,
        })
        .await;

        Ok(ManufacturingOrderTransition {
            order,
            movements: vec![posted.movement],
        })
    }

    /// Cancels an open order. Consumed components are returned to stock when
    /// the order was already in production and restoring is enabled.
    #[instrument(skip(self))]
    pub async fn cancel_manufacturing_order(
        &self,
        mo_id: Uuid,
        actor_id: Uuid,
    ) -> Result<ManufacturingOrderTransition, ServiceError> {
        let restore = self.settings.restore_stock_on_cancel;
        let (order, posted) = db::with_retry(
            "manufacturing_order.cancel",
            self.settings.lock_retry_attempts,
            self.settings.lock_retry_backoff,
            move || async move {
                let txn = db::begin_write(&self.db).await?;
                let result = cancel_in_txn(&txn, mo_id, actor_id, restore).await;
                db::finish_transaction(txn, result).await
            },
        )
        .await?;

        counter!("manufacturing.orders.cancelled", 1);
        info!(
            mo_id = %order.id,
            reference = %order.reference,
            restored_movements = posted.len(),
            "Manufacturing order cancelled"
        );

        self.ledger.emit_posted(&posted).await;
        self.emit(Event::ManufacturingOrderCancelled {
            mo_id: order.id,
            reference: order.reference.clone(),
            restored_movements: posted.len(),
        })
        .await;

        Ok(ManufacturingOrderTransition {
            order,
            movements: posted.into_iter().map(|p| p.movement).collect(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_manufacturing_order(
        &self,
        mo_id: Uuid,
    ) -> Result<manufacturing_order::Model, ServiceError> {
        find_order(&*self.db, mo_id).await
    }

    /// Lists orders newest first
    #[instrument(skip(self))]
    pub async fn list_manufacturing_orders(
        &self,
        filter: ManufacturingOrderFilter,
    ) -> Result<Vec<manufacturing_order::Model>, ServiceError> {
        let mut query =
            ManufacturingOrderEntity::find().order_by_desc(manufacturing_order::Column::CreatedAt);
        if let Some(state) = filter.state {
            query = query.filter(manufacturing_order::Column::State.eq(state));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(manufacturing_order::Column::ProductId.eq(product_id));
        }
        query
            .limit(filter.limit.unwrap_or(100).min(1000))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn work_orders(&self, mo_id: Uuid) -> Result<Vec<work_order::Model>, ServiceError> {
        let db = &*self.db;
        find_order(db, mo_id).await?;
        WorkOrderEntity::find()
            .filter(work_order::Column::ManufacturingOrderId.eq(mo_id))
            .order_by_asc(work_order::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

async fn find_order<C: ConnectionTrait>(
    conn: &C,
    mo_id: Uuid,
) -> Result<manufacturing_order::Model, ServiceError> {
    ManufacturingOrderEntity::find_by_id(mo_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Manufacturing order {} not found", mo_id)))
}

/// Moves the order from `from` to `to` only if no one else has moved it first.
/// Losing the race reports the state the winner left behind.
async fn claim_transition(
    txn: &DatabaseTransaction,
    order: &manufacturing_order::Model,
    from: ManufacturingOrderState,
    to: ManufacturingOrderState,
    action: &'static str,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    let mut update = ManufacturingOrderEntity::update_many()
        .col_expr(manufacturing_order::Column::State, Expr::value(to))
        .col_expr(manufacturing_order::Column::UpdatedAt, Expr::value(now));

    update = match to {
        ManufacturingOrderState::InProgress => {
            update.col_expr(manufacturing_order::Column::StartedAt, Expr::value(Some(now)))
        }
        ManufacturingOrderState::Done => {
            update.col_expr(manufacturing_order::Column::CompletedAt, Expr::value(Some(now)))
        }
        ManufacturingOrderState::Cancelled => {
            update.col_expr(manufacturing_order::Column::CancelledAt, Expr::value(Some(now)))
        }
        ManufacturingOrderState::Planned => update,
    };

    let result = update
        .filter(manufacturing_order::Column::Id.eq(order.id))
        .filter(manufacturing_order::Column::State.eq(from))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 1 {
        return Ok(());
    }

    let current = find_order(txn, order.id).await?;
    Err(ServiceError::invalid_transition(ENTITY, order.id, current.state, action))
}

async fn confirm_in_txn(
    txn: &DatabaseTransaction,
    mo_id: Uuid,
    actor_id: Uuid,
) -> Result<(manufacturing_order::Model, Vec<PostedMovement>), ServiceError> {
    let order = find_order(txn, mo_id).await?;
    if order.state != ManufacturingOrderState::Planned {
        return Err(ServiceError::invalid_transition(ENTITY, mo_id, order.state, "confirm"));
    }

    claim_transition(
        txn,
        &order,
        ManufacturingOrderState::Planned,
        ManufacturingOrderState::InProgress,
        "confirm",
    )
    .await?;

    let definition = bom::load_definition(txn, order.bom_id).await?;
    let components = bom::resolve(&definition.lines, order.quantity_to_produce);
    let requirements = bom::aggregate_requirements(&components);

    let posted = stock_ledger::consume_batch_in_txn(
        txn,
        Some(order.id),
        Some(order.reference.as_str()),
        &requirements,
        actor_id,
    )
    .await?;

    let order = find_order(txn, mo_id).await?;
    Ok((order, posted))
}

async fn complete_in_txn(
    txn: &DatabaseTransaction,
    mo_id: Uuid,
    quantity_produced: Option<f64>,
    actor_id: Uuid,
) -> Result<(manufacturing_order::Model, PostedMovement), ServiceError> {
    let order = find_order(txn, mo_id).await?;
    if order.state != ManufacturingOrderState::InProgress {
        return Err(ServiceError::invalid_transition(ENTITY, mo_id, order.state, "complete"));
    }

    let quantity = quantity_produced.unwrap_or(order.quantity_to_produce);
    claim_transition(
        txn,
        &order,
        ManufacturingOrderState::InProgress,
        ManufacturingOrderState::Done,
        "complete",
    )
    .await?;

    ManufacturingOrderEntity::update_many()
        .col_expr(manufacturing_order::Column::QuantityProduced, Expr::value(quantity))
        .filter(manufacturing_order::Column::Id.eq(mo_id))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let posted = stock_ledger::post_in_txn(
        txn,
        &PostMovementCommand {
            product_id: order.product_id,
            quantity,
            movement_type: MovementType::Production,
            reference: Some(order.reference.clone()),
            unit_cost: None,
            manufacturing_order_id: Some(order.id),
            actor_id,
        },
    )
    .await?;

    let order = find_order(txn, mo_id).await?;
    Ok((order, posted))
}

async fn cancel_in_txn(
    txn: &DatabaseTransaction,
    mo_id: Uuid,
    actor_id: Uuid,
    restore_stock: bool,
) -> Result<(manufacturing_order::Model, Vec<PostedMovement>), ServiceError> {
    let order = find_order(txn, mo_id).await?;
    if !order.state.can_transition_to(ManufacturingOrderState::Cancelled) {
        return Err(ServiceError::invalid_transition(ENTITY, mo_id, order.state, "cancel"));
    }

    claim_transition(
        txn,
        &order,
        order.state,
        ManufacturingOrderState::Cancelled,
        "cancel",
    )
    .await?;

    let mut restored = Vec::new();
    if restore_stock && order.state == ManufacturingOrderState::InProgress {
        let consumed = stock_ledger::movements_for_order(txn, order.id).await?;
        for movement in consumed
            .iter()
            .filter(|m| m.movement_type == MovementType::Consumption)
        {
            let posted = stock_ledger::post_in_txn(
                txn,
                &PostMovementCommand {
                    product_id: movement.product_id,
                    quantity: movement.quantity,
                    movement_type: MovementType::In,
                    reference: Some(order.reference.clone()),
                    unit_cost: Some(movement.unit_cost),
                    manufacturing_order_id: Some(order.id),
                    actor_id,
                },
            )
            .await?;
            restored.push(posted);
        }
    }

    WorkOrderEntity::update_many()
        .col_expr(work_order::Column::State, Expr::value(WorkOrderState::Cancelled))
        .col_expr(work_order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(work_order::Column::ManufacturingOrderId.eq(order.id))
        .filter(work_order::Column::State.is_in([WorkOrderState::Pending, WorkOrderState::InProgress]))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let order = find_order(txn, mo_id).await?;
    Ok((order, restored))
}
