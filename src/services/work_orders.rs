use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    config::ManufacturingSettings,
    db,
    entities::work_order::{self, Entity as WorkOrderEntity, WorkOrderState},
    errors::ServiceError,
    events::{Event, EventSender},
};

const ENTITY: &str = "work order";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkOrderFilter {
    pub manufacturing_order_id: Option<Uuid>,
    pub state: Option<WorkOrderState>,
    pub limit: Option<u64>,
}

/// Elapsed minutes between start and completion, at millisecond precision.
///
/// A recorded start always wins over the caller's figure; without one the
/// supplied time is used, falling back to the estimate.
pub fn derive_actual_time(
    started_at: Option<DateTime<Utc>>,
    completed_at: DateTime<Utc>,
    supplied: Option<f64>,
    estimated: f64,
) -> f64 {
    match started_at {
        Some(started) => {
            let elapsed_ms = (completed_at - started).num_milliseconds().max(0) as f64;
            elapsed_ms / 60_000.0
        }
        None => supplied.unwrap_or(estimated),
    }
}

/// Tracks the processing steps of manufacturing orders
#[derive(Clone)]
pub struct WorkOrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    settings: ManufacturingSettings,
}

impl WorkOrderService {
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

    /// Starts a pending work order
    #[instrument(skip(self))]
    pub async fn start_work_order(&self, wo_id: Uuid) -> Result<work_order::Model, ServiceError> {
        let work_order = db::with_retry(
            "work_order.start",
            self.settings.lock_retry_attempts,
            self.settings.lock_retry_backoff,
            move || async move {
                let txn = db::begin_write(&self.db).await?;
                let result = start_in_txn(&txn, wo_id).await;
                db::finish_transaction(txn, result).await
            },
        )
        .await?;

        counter!("work_orders.started", 1);
        info!(wo_id = %wo_id, "Work order started");
        self.emit(Event::WorkOrderStarted(wo_id)).await;

        Ok(work_order)
    }

    /// Completes a work order, deriving the actual time from its start stamp
    #[instrument(skip(self, notes))]
    pub async fn complete_work_order(
        &self,
        wo_id: Uuid,
        actual_time: Option<f64>,
        notes: Option<String>,
    ) -> Result<work_order::Model, ServiceError> {
        if let Some(minutes) = actual_time {
            if !(minutes.is_finite() && minutes >= 0.0) {
                return Err(ServiceError::ValidationError(format!(
                    "Actual time cannot be negative, got: {}",
                    minutes
                )));
            }
        }

        let notes = notes.as_deref();
        let work_order = db::with_retry(
            "work_order.complete",
            self.settings.lock_retry_attempts,
            self.settings.lock_retry_backoff,
            move || async move {
                let txn = db::begin_write(&self.db).await?;
                let result = complete_in_txn(&txn, wo_id, actual_time, notes).await;
                db::finish_transaction(txn, result).await
            },
        )
        .await?;

        let minutes = work_order.effective_time();
        counter!("work_orders.completed", 1);
        histogram!("work_orders.actual_time_minutes", minutes);
        info!(wo_id = %wo_id, actual_time = minutes, "Work order completed");
        self.emit(Event::WorkOrderCompleted {
            wo_id,
            actual_time: minutes,
        })
        .await;

        Ok(work_order)
    }

    #[instrument(skip(self))]
    pub async fn cancel_work_order(&self, wo_id: Uuid) -> Result<work_order::Model, ServiceError> {
        let work_order = db::with_retry(
            "work_order.cancel",
            self.settings.lock_retry_attempts,
            self.settings.lock_retry_backoff,
            move || async move {
                let txn = db::begin_write(&self.db).await?;
                let result = cancel_in_txn(&txn, wo_id).await;
                db::finish_transaction(txn, result).await
            },
        )
        .await?;

        counter!("work_orders.cancelled", 1);
        info!(wo_id = %wo_id, "Work order cancelled");
        self.emit(Event::WorkOrderCancelled(wo_id)).await;

        Ok(work_order)
    }

    #[instrument(skip(self))]
    pub async fn get_work_order(&self, wo_id: Uuid) -> Result<work_order::Model, ServiceError> {
        find_work_order(&*self.db, wo_id).await
    }

    #[instrument(skip(self))]
    pub async fn list_work_orders(
        &self,
        filter: WorkOrderFilter,
    ) -> Result<Vec<work_order::Model>, ServiceError> {
        let mut query = WorkOrderEntity::find().order_by_desc(work_order::Column::CreatedAt);
        if let Some(mo_id) = filter.manufacturing_order_id {
            query = query.filter(work_order::Column::ManufacturingOrderId.eq(mo_id));
        }
        if let Some(state) = filter.state {
            query = query.filter(work_order::Column::State.eq(state));
        }
        query
            .limit(filter.limit.unwrap_or(100).min(1000))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

async fn find_work_order<C: ConnectionTrait>(
    conn: &C,
    wo_id: Uuid,
) -> Result<work_order::Model, ServiceError> {
    WorkOrderEntity::find_by_id(wo_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Work order {} not found", wo_id)))
}

/// Fails with `InvalidTransition` when the guarded update lost to another writer.
async fn ensure_claimed(
    txn: &DatabaseTransaction,
    wo_id: Uuid,
    rows_affected: u64,
    action: &'static str,
) -> Result<(), ServiceError> {
    if rows_affected == 1 {
        return Ok(());
    }
    let current = find_work_order(txn, wo_id).await?;
    Err(ServiceError::invalid_transition(ENTITY, wo_id, current.state, action))
}

async fn start_in_txn(
    txn: &DatabaseTransaction,
    wo_id: Uuid,
) -> Result<work_order::Model, ServiceError> {
    let work_order = find_work_order(txn, wo_id).await?;
    if work_order.state != WorkOrderState::Pending {
        return Err(ServiceError::invalid_transition(ENTITY, wo_id, work_order.state, "start"));
    }

    let now = Utc::now();
    let result = WorkOrderEntity::update_many()
        .col_expr(work_order::Column::State, Expr::value(WorkOrderState::InProgress))
        .col_expr(work_order::Column::StartedAt, Expr::value(Some(now)))
        .col_expr(work_order::Column::UpdatedAt, Expr::value(now))
        .filter(work_order::Column::Id.eq(wo_id))
        .filter(work_order::Column::State.eq(WorkOrderState::Pending))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    ensure_claimed(txn, wo_id, result.rows_affected, "start").await?;

    find_work_order(txn, wo_id).await
}

async fn complete_in_txn(
    txn: &DatabaseTransaction,
    wo_id: Uuid,
    actual_time: Option<f64>,
    notes: Option<&str>,
) -> Result<work_order::Model, ServiceError> {
    let work_order = find_work_order(txn, wo_id).await?;
    if work_order.state.is_terminal() {
        return Err(ServiceError::invalid_transition(ENTITY, wo_id, work_order.state, "complete"));
    }

    let now = Utc::now();
    let minutes = derive_actual_time(
        work_order.started_at,
        now,
        actual_time,
        work_order.estimated_time,
    );

    let mut update = WorkOrderEntity::update_many()
        .col_expr(work_order::Column::State, Expr::value(WorkOrderState::Completed))
        .col_expr(work_order::Column::CompletedAt, Expr::value(Some(now)))
        .col_expr(work_order::Column::ActualTime, Expr::value(Some(minutes)))
        .col_expr(work_order::Column::UpdatedAt, Expr::value(now));
    if let Some(notes) = notes {
        update = update.col_expr(work_order::Column::Notes, Expr::value(Some(notes.to_string())));
    }

    let result = update
        .filter(work_order::Column::Id.eq(wo_id))
        .filter(work_order::Column::State.eq(work_order.state))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    ensure_claimed(txn, wo_id, result.rows_affected, "complete").await?;

    find_work_order(txn, wo_id).await
}

async fn cancel_in_txn(
    txn: &DatabaseTransaction,
    wo_id: Uuid,
) -> Result<work_order::Model, ServiceError> {
    let work_order = find_work_order(txn, wo_id).await?;
    if work_order.state.is_terminal() {
        return Err(ServiceError::invalid_transition(ENTITY, wo_id, work_order.state, "cancel"));
    }

    let result = WorkOrderEntity::update_many()
        .col_expr(work_order::Column::State, Expr::value(WorkOrderState::Cancelled))
        .col_expr(work_order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(work_order::Column::Id.eq(wo_id))
        .filter(work_order::Column::State.eq(work_order.state))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    ensure_claimed(txn, wo_id, result.rows_affected, "cancel").await?;

    find_work_order(txn, wo_id).await
}
