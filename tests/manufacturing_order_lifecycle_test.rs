mod common;

use assert_matches::assert_matches;
use common::TestContext;
use manuflow_api::{
    config::ManufacturingSettings,
    entities::{manufacturing_order, work_order, ManufacturingOrderState, MovementType, WorkOrderState},
    errors::ServiceError,
    events::Event,
    services::{
        manufacturing::{ManufacturingOrderFilter, ManufacturingOrderService},
        reports::ProductionReportQuery,
        stock_ledger::{MovementFilter, StockLedger},
    },
};
use regex::Regex;
use sea_orm::{EntityTrait, PaginatorTrait};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[tokio::test]
async fn wooden_table_end_to_end() {
    let mut ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let mo_service = ctx.services.manufacturing_orders.clone();

    let planned = mo_service
        .create_manufacturing_order(ctx.order_input(&fixture, 5.0))
        .await
        .expect("create order");

    assert_eq!(planned.order.state, ManufacturingOrderState::Planned);
    assert!(Regex::new(r"^MO\d{10}$").unwrap().is_match(&planned.order.reference));
    assert_eq!(planned.work_orders.len(), 2);

    let mut estimates: Vec<(String, f64)> = planned
        .work_orders
        .iter()
        .map(|wo| (wo.operation_name.clone(), wo.estimated_time))
        .collect();
    estimates.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        estimates,
        vec![
            ("Process Wooden Legs".to_string(), 50.0),
            ("Process Wooden Top".to_string(), 150.0),
        ]
    );
    assert!(planned
        .work_orders
        .iter()
        .all(|wo| wo.state == WorkOrderState::Pending && wo.work_center_id == fixture.work_center.id));

    // Stock is untouched until confirmation
    assert_eq!(ctx.stock_of(fixture.legs.id).await, 100.0);

    let confirmed = mo_service
        .confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .expect("confirm order");
    assert_eq!(confirmed.order.state, ManufacturingOrderState::InProgress);
    assert!(confirmed.order.started_at.is_some());
    assert_eq!(confirmed.movements.len(), 2);
    assert!(confirmed.movements.iter().all(|m| {
        m.movement_type == MovementType::Consumption
            && m.reference.as_deref() == Some(planned.order.reference.as_str())
            && m.manufacturing_order_id == Some(planned.order.id)
            && m.created_by == ctx.actor
    }));

    assert_eq!(ctx.stock_of(fixture.legs.id).await, 80.0);
    assert_eq!(ctx.stock_of(fixture.top.id).await, 45.0);

    let completed = mo_service
        .complete_manufacturing_order(planned.order.id, None, ctx.actor)
        .await
        .expect("complete order");
    assert_eq!(completed.order.state, ManufacturingOrderState::Done);
    assert_eq!(completed.order.quantity_produced, 5.0);
    assert!(completed.order.completed_at.is_some());
    assert_eq!(completed.movements.len(), 1);
    assert_eq!(completed.movements[0].movement_type, MovementType::Production);
    assert_eq!(ctx.stock_of(fixture.table.id).await, 5.0);

    let report = ctx
        .services
        .reports
        .production_report(ProductionReportQuery::default())
        .await
        .expect("production report");
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].efficiency, 100.0);
    assert_eq!(report[0].total_time, 200.0);
    assert_eq!(report[0].product_name, "Wooden Table");

    for product_id in [fixture.legs.id, fixture.top.id, fixture.table.id] {
        let reconciliation = ctx
            .services
            .stock_ledger
            .reconcile(product_id)
            .await
            .expect("reconcile");
        assert!(reconciliation.balanced, "{:?}", reconciliation);
    }

    let names: Vec<&str> = ctx.drain_events().iter().map(Event::name).collect::<Vec<_>>();
    assert!(names.contains(&"manufacturing_order_created"));
    assert!(names.contains(&"manufacturing_order_confirmed"));
    assert!(names.contains(&"manufacturing_order_completed"));
    assert_eq!(names.iter().filter(|n| **n == "stock_moved").count(), 3);
}

#[tokio::test]
async fn double_confirm_is_rejected() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let planned = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 5.0))
        .await
        .unwrap();
    svc.confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap();

    let err = svc
        .confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidTransition { ref from, action: "confirm", .. } if from == "in_progress"
    );

    // The second attempt consumed nothing
    assert_eq!(ctx.stock_of(fixture.legs.id).await, 80.0);
}

#[tokio::test]
async fn complete_before_confirm_is_rejected() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let planned = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 5.0))
        .await
        .unwrap();
    let err = svc
        .complete_manufacturing_order(planned.order.id, Some(5.0), ctx.actor)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidTransition { action: "complete", .. });
    assert_eq!(ctx.stock_of(fixture.table.id).await, 0.0);
}

#[tokio::test]
async fn insufficient_stock_leaves_order_planned_and_ledger_untouched() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    // 30 tables need 120 legs; only 100 on hand
    let planned = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 30.0))
        .await
        .unwrap();
    let err = svc
        .confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientStock { product_id, required, available, .. }
            if product_id == fixture.legs.id && required == 120.0 && available == 100.0
    );
    assert_eq!(err.shortfall(), 20.0);

    let reloaded = svc.get_manufacturing_order(planned.order.id).await.unwrap();
    assert_eq!(reloaded.state, ManufacturingOrderState::Planned);
    assert!(reloaded.started_at.is_none());

    assert_eq!(ctx.stock_of(fixture.legs.id).await, 100.0);
    assert_eq!(ctx.stock_of(fixture.top.id).await, 50.0);

    let movements = ctx
        .services
        .stock_ledger
        .list_movements(MovementFilter {
            manufacturing_order_id: Some(planned.order.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(movements.is_empty());
}

#[tokio::test]
async fn complete_with_partial_quantity_reports_efficiency() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let planned = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 4.0))
        .await
        .unwrap();
    svc.confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap();
    let done = svc
        .complete_manufacturing_order(planned.order.id, Some(3.0), ctx.actor)
        .await
        .unwrap();

    assert_eq!(done.order.quantity_produced, 3.0);
    assert_eq!(ctx.stock_of(fixture.table.id).await, 3.0);

    let report = ctx
        .services
        .reports
        .production_report(ProductionReportQuery::default())
        .await
        .unwrap();
    assert_eq!(report[0].efficiency, 75.0);
}

#[tokio::test]
async fn complete_rejects_non_positive_quantity() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let planned = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 2.0))
        .await
        .unwrap();
    svc.confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap();

    let err = svc
        .complete_manufacturing_order(planned.order.id, Some(0.0), ctx.actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let reloaded = svc.get_manufacturing_order(planned.order.id).await.unwrap();
    assert_eq!(reloaded.state, ManufacturingOrderState::InProgress);
}

#[tokio::test]
async fn cancel_in_progress_restores_consumed_stock() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let planned = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 5.0))
        .await
        .unwrap();
    svc.confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap();

    let cancelled = svc
        .cancel_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap();
    assert_eq!(cancelled.order.state, ManufacturingOrderState::Cancelled);
    assert!(cancelled.order.cancelled_at.is_some());
    assert_eq!(cancelled.movements.len(), 2);
    assert!(cancelled
        .movements
        .iter()
        .all(|m| m.movement_type == MovementType::In));

    assert_eq!(ctx.stock_of(fixture.legs.id).await, 100.0);
    assert_eq!(ctx.stock_of(fixture.top.id).await, 50.0);

    let work_orders = svc.work_orders(planned.order.id).await.unwrap();
    assert!(work_orders
        .iter()
        .all(|wo| wo.state == WorkOrderState::Cancelled));

    let reconciliation = ctx
        .services
        .stock_ledger
        .reconcile(fixture.legs.id)
        .await
        .unwrap();
    assert!(reconciliation.balanced);
    assert_eq!(reconciliation.total_out, 20.0);
    assert_eq!(reconciliation.total_in, 20.0);
}

#[tokio::test]
async fn cancel_without_restore_keeps_consumption() {
    let ctx = TestContext::with_config(|cfg| cfg.restore_stock_on_cancel = false).await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let planned = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 5.0))
        .await
        .unwrap();
    svc.confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap();
    let cancelled = svc
        .cancel_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap();

    assert!(cancelled.movements.is_empty());
    assert_eq!(ctx.stock_of(fixture.legs.id).await, 80.0);
}

#[tokio::test]
async fn terminal_orders_cannot_be_cancelled() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let planned = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 1.0))
        .await
        .unwrap();
    svc.cancel_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap();

    let err = svc
        .cancel_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { action: "cancel", .. });

    let err = svc
        .confirm_manufacturing_order(planned.order.id, ctx.actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { action: "confirm", .. });
}

#[tokio::test]
async fn create_validates_inputs() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let err = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 0.0))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let mut wrong_product = ctx.order_input(&fixture, 1.0);
    wrong_product.product_id = fixture.legs.id;
    let err = svc.create_manufacturing_order(wrong_product).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let mut missing_bom = ctx.order_input(&fixture, 1.0);
    missing_bom.bom_id = uuid::Uuid::new_v4();
    let err = svc.create_manufacturing_order(missing_bom).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let mut no_center = ctx.order_input(&fixture, 1.0);
    no_center.work_center_id = None;
    let err = svc.create_manufacturing_order(no_center).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let orders = svc
        .list_manufacturing_orders(ManufacturingOrderFilter::default())
        .await
        .unwrap();
    assert!(orders.is_empty(), "failed creations must not persist orders");
}

#[tokio::test]
async fn configured_default_work_center_is_used() {
    let mut ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let work_center_id = fixture.work_center.id;
    ctx.reconfigure(|cfg| cfg.default_work_center_id = Some(work_center_id));

    let mut input = ctx.order_input(&fixture, 2.0);
    input.work_center_id = None;
    let planned = ctx
        .services
        .manufacturing_orders
        .create_manufacturing_order(input)
        .await
        .unwrap();

    assert_eq!(planned.work_orders.len(), 2);
    assert!(planned
        .work_orders
        .iter()
        .all(|wo| wo.work_center_id == work_center_id));
}

#[tokio::test]
async fn list_filters_by_state() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = &ctx.services.manufacturing_orders;

    let first = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 1.0))
        .await
        .unwrap();
    svc.create_manufacturing_order(ctx.order_input(&fixture, 1.0))
        .await
        .unwrap();
    svc.confirm_manufacturing_order(first.order.id, ctx.actor)
        .await
        .unwrap();

    let in_progress = svc
        .list_manufacturing_orders(ManufacturingOrderFilter {
            state: Some(ManufacturingOrderState::InProgress),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].id, first.order.id);

    let all = svc
        .list_manufacturing_orders(ManufacturingOrderFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

/// Order service whose references come from `generator` instead of the clock and RNG.
fn service_with_references(
    ctx: &TestContext,
    generator: impl Fn(&str) -> String + Send + Sync + 'static,
) -> ManufacturingOrderService {
    let settings = ManufacturingSettings::from(&ctx.config);
    let ledger = StockLedger::new(ctx.db.clone(), None, settings.clone());
    ManufacturingOrderService::new(ctx.db.clone(), ledger, None, settings)
        .with_reference_generator(Arc::new(generator))
}

#[tokio::test]
async fn exhausted_reference_space_is_a_conflict_without_partial_rows() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let svc = service_with_references(&ctx, |prefix| format!("{}2601010001", prefix));

    let first = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 5.0))
        .await
        .expect("first reference is free");
    assert_eq!(first.order.reference, "MO2601010001");

    let err = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 5.0))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::ConcurrencyConflict(ref msg) if msg.contains("after 5 attempt(s)")
    );

    let orders = manufacturing_order::Entity::find().count(&*ctx.db).await.unwrap();
    let work_orders = work_order::Entity::find().count(&*ctx.db).await.unwrap();
    assert_eq!(orders, 1);
    assert_eq!(work_orders, 2);
    assert_eq!(ctx.stock_of(fixture.legs.id).await, 100.0);
}

#[tokio::test]
async fn taken_reference_is_regenerated() {
    let ctx = TestContext::new().await;
    let fixture = ctx.wooden_table().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    // The second draw repeats the first reference, the third is fresh
    let svc = service_with_references(&ctx, move |prefix| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        format!("{}260101{:04}", prefix, n.saturating_sub(1))
    });

    let first = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 5.0))
        .await
        .unwrap();
    assert_eq!(first.order.reference, "MO2601010000");

    let second = svc
        .create_manufacturing_order(ctx.order_input(&fixture, 2.0))
        .await
        .unwrap();
    assert_eq!(second.order.reference, "MO2601010001");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(second.work_orders.len(), 2);

    let orders = manufacturing_order::Entity::find().count(&*ctx.db).await.unwrap();
    assert_eq!(orders, 2);
}
