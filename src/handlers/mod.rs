pub mod bom;
pub mod common;
pub mod health;
pub mod inventory;
pub mod manufacturing;
pub mod reports;
pub mod work_centers;
pub mod work_orders;

use crate::config::ManufacturingSettings;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    bom::BomService, catalog::CatalogService, manufacturing::ManufacturingOrderService,
    reports::ReportService, stock_ledger::StockLedger, work_orders::WorkOrderService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub boms: Arc<BomService>,
    pub stock_ledger: Arc<StockLedger>,
    pub manufacturing_orders: Arc<ManufacturingOrderService>,
    pub work_orders: Arc<WorkOrderService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        settings: ManufacturingSettings,
    ) -> Self {
        let boms = BomService::new(db_pool.clone());
        let stock_ledger = StockLedger::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            settings.clone(),
        );
        let manufacturing_orders = ManufacturingOrderService::new(
            db_pool.clone(),
            stock_ledger.clone(),
            Some(event_sender.clone()),
            settings.clone(),
        );
        let work_orders = WorkOrderService::new(db_pool.clone(), Some(event_sender), settings);

        Self {
            catalog: Arc::new(CatalogService::new(db_pool.clone(), boms.clone())),
            boms: Arc::new(boms),
            stock_ledger: Arc::new(stock_ledger),
            manufacturing_orders: Arc::new(manufacturing_orders),
            work_orders: Arc::new(work_orders),
            reports: Arc::new(ReportService::new(db_pool)),
        }
    }
}
