//! Manuflow API Library
//!
//! Manufacturing orders, work orders and an append-only stock ledger over a
//! relational database, exposed through an axum HTTP layer.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires every service against one pool and event channel
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let settings = config::ManufacturingSettings::from(&config);
        let services = handlers::AppServices::new(db.clone(), event_sender.clone(), settings);
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// Routes mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest(
            "/manufacturing-orders",
            handlers::manufacturing::manufacturing_order_routes(),
        )
        .nest("/work-orders", handlers::work_orders::work_order_routes())
        .nest("/stock-movements", handlers::inventory::stock_movement_routes())
        .nest("/products", handlers::inventory::product_routes())
        .nest("/boms", handlers::bom::bom_routes())
        .nest("/work-centers", handlers::work_centers::work_center_routes())
        .nest("/reports", handlers::reports::report_routes())
}

/// Full application router with tracing, CORS and request timeout layers
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "manuflow-api up" }))
        .nest("/health", handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub mod prelude {
    pub use crate::config::{AppConfig, ManufacturingSettings};
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::services::{
        bom::BomService, catalog::CatalogService, manufacturing::ManufacturingOrderService,
        reports::ReportService, stock_ledger::StockLedger, work_orders::WorkOrderService,
    };
}
