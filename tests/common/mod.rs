#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use manuflow_api::{
    config::{AppConfig, ManufacturingSettings},
    db::{self, DbConfig},
    entities::{bom, product, work_center},
    events::{Event, EventSender},
    handlers::AppServices,
    services::{
        bom::{BomDefinition, CreateBomInput, CreateBomLineInput},
        catalog::{CreateProductInput, CreateWorkCenterInput},
        manufacturing::CreateManufacturingOrderInput,
    },
    AppState,
};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Application wired against a fresh SQLite database.
///
/// [`TestContext::new`] uses a single in-memory connection, so concurrent
/// operations queue on it. [`TestContext::file_backed`] opens a real pool over
/// a temporary file, where transactions contend for the write lock.
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub services: AppServices,
    pub actor: Uuid,
    events: mpsc::Receiver<Event>,
    event_sender: EventSender,
    _dir: Option<TempDir>,
}

/// The wooden table catalog: 4 legs and 1 top per table, 10 and 30 minutes.
pub struct WoodenTable {
    pub legs: product::Model,
    pub top: product::Model,
    pub table: product::Model,
    pub work_center: work_center::Model,
    pub bom: BomDefinition,
}

impl WoodenTable {
    pub fn bom_id(&self) -> Uuid {
        self.bom.bom.id
    }
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(DbConfig::sqlite_in_memory(), None, customize).await
    }

    /// Multi-connection pool over a temporary SQLite file
    pub async fn file_backed(max_connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("manuflow.db").display()
        );
        let db_config = DbConfig {
            url,
            max_connections,
            min_connections: 1,
            ..Default::default()
        };
        Self::build(db_config, Some(dir), |_| {}).await
    }

    async fn build(
        db_config: DbConfig,
        dir: Option<TempDir>,
        customize: impl FnOnce(&mut AppConfig),
    ) -> Self {
        let mut config = AppConfig::new(
            db_config.url.clone(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        config.lock_retry_backoff_ms = 1;
        customize(&mut config);

        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (tx, rx) = mpsc::channel(4096);
        let event_sender = EventSender::new(tx);
        let services = AppServices::new(
            db.clone(),
            event_sender.clone(),
            ManufacturingSettings::from(&config),
        );

        Self {
            db,
            config,
            services,
            actor: Uuid::new_v4(),
            events: rx,
            event_sender,
            _dir: dir,
        }
    }

    /// Rebuilds the services after changing configuration; data is kept
    pub fn reconfigure(&mut self, customize: impl FnOnce(&mut AppConfig)) {
        customize(&mut self.config);
        self.services = AppServices::new(
            self.db.clone(),
            self.event_sender.clone(),
            ManufacturingSettings::from(&self.config),
        );
    }

    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            event_sender: self.event_sender.clone(),
            services: self.services.clone(),
        }
    }

    pub fn router(&self) -> Router {
        manuflow_api::build_router(self.state())
    }

    /// Events published so far, in emission order
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn product(&self, name: &str, stock: f64, min_stock: f64) -> product::Model {
        self.services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                description: None,
                unit_of_measure: Some("Pieces".to_string()),
                initial_stock: stock,
                min_stock,
                cost_price: 1.0,
                is_raw_material: true,
            })
            .await
            .expect("create product")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> f64 {
        self.services
            .catalog
            .get_product(product_id)
            .await
            .expect("load product")
            .current_stock
    }

    pub async fn wooden_table(&self) -> WoodenTable {
        self.wooden_table_with_stock(100.0, 50.0).await
    }

    pub async fn wooden_table_with_stock(&self, legs_stock: f64, top_stock: f64) -> WoodenTable {
        let legs = self.product("Wooden Legs", legs_stock, 20.0).await;
        let top = self.product("Wooden Top", top_stock, 10.0).await;
        let table = self
            .services
            .catalog
            .create_product(CreateProductInput {
                name: "Wooden Table".to_string(),
                description: None,
                unit_of_measure: None,
                initial_stock: 0.0,
                min_stock: 0.0,
                cost_price: 100.0,
                is_raw_material: false,
            })
            .await
            .expect("create table");
        let work_center = self
            .services
            .catalog
            .create_work_center(CreateWorkCenterInput {
                name: "Main Assembly Line".to_string(),
                description: None,
                cost_per_hour: 50.0,
                capacity: None,
            })
            .await
            .expect("create work center");
        let bom = self
            .services
            .boms
            .create_bom(CreateBomInput {
                product_id: table.id,
                name: "Wooden Table".to_string(),
                description: None,
                quantity: None,
                lines: vec![
                    CreateBomLineInput {
                        product_id: legs.id,
                        quantity: 4.0,
                        operation_time: 10.0,
                    },
                    CreateBomLineInput {
                        product_id: top.id,
                        quantity: 1.0,
                        operation_time: 30.0,
                    },
                ],
            })
            .await
            .expect("create bom");

        WoodenTable {
            legs,
            top,
            table,
            work_center,
            bom,
        }
    }

    pub fn order_input(&self, fixture: &WoodenTable, quantity: f64) -> CreateManufacturingOrderInput {
        CreateManufacturingOrderInput {
            product_id: fixture.table.id,
            bom_id: fixture.bom_id(),
            quantity_to_produce: quantity,
            scheduled_date: None,
            assignee_id: None,
            work_center_id: Some(fixture.work_center.id),
            actor_id: self.actor,
        }
    }

    pub async fn bom_header(&self, bom_id: Uuid) -> bom::Model {
        self.services
            .boms
            .get_bom(bom_id)
            .await
            .expect("load bom")
            .bom
    }
}

/// Sends one request through the router and returns status plus JSON body.
pub async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).expect("build request"))
        .await
        .expect("router is infallible");

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
