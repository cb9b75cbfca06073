use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::MovementType;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Domain operations have already committed when events are emitted.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            counter!("events.dropped", 1, "event" => name);
            warn!(event = name, "Dropping domain event: {}", e);
        }
    }
}

/// Domain events emitted after a manufacturing or ledger transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ManufacturingOrderCreated {
        mo_id: Uuid,
        reference: String,
        work_orders: usize,
    },
    ManufacturingOrderConfirmed {
        mo_id: Uuid,
        reference: String,
        movements: usize,
    },
    ManufacturingOrderCompleted {
        mo_id: Uuid,
        reference: String,
        quantity_produced: f64,
    },
    ManufacturingOrderCancelled {
        mo_id: Uuid,
        reference: String,
        restored_movements: usize,
    },
    WorkOrderStarted(Uuid),
    WorkOrderCompleted {
        wo_id: Uuid,
        actual_time: f64,
    },
    WorkOrderCancelled(Uuid),
    StockMoved {
        movement_id: Uuid,
        product_id: Uuid,
        movement_type: MovementType,
        quantity: f64,
        new_stock: f64,
    },
    LowStockDetected {
        product_id: Uuid,
        current_stock: f64,
        min_stock: f64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ManufacturingOrderCreated { .. } => "manufacturing_order_created",
            Event::ManufacturingOrderConfirmed { .. } => "manufacturing_order_confirmed",
            Event::ManufacturingOrderCompleted { .. } => "manufacturing_order_completed",
            Event::ManufacturingOrderCancelled { .. } => "manufacturing_order_cancelled",
            Event::WorkOrderStarted(_) => "work_order_started",
            Event::WorkOrderCompleted { .. } => "work_order_completed",
            Event::WorkOrderCancelled(_) => "work_order_cancelled",
            Event::StockMoved { .. } => "stock_moved",
            Event::LowStockDetected { .. } => "low_stock_detected",
        }
    }
}

// Handlers implementing this trait receive every event in arrival order.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Logs low stock at warn level so it surfaces in operator dashboards.
pub struct LowStockAlertHandler;

#[async_trait]
impl EventHandler for LowStockAlertHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        if let Event::LowStockDetected {
            product_id,
            current_stock,
            min_stock,
        } = event
        {
            warn!(
                product_id = %product_id,
                current_stock,
                min_stock,
                "Product stock at or below reorder threshold"
            );
        }
        Ok(())
    }
}

/// Drains the event channel, dispatching each event to every handler.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(event = event.name(), "Received event: {:?}", event);
        counter!("events.processed", 1, "event" => event.name());

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(event = event.name(), "Event handler failed: {}", e);
            }
        }
    }

    info!("Event channel closed; stopping event processing loop");
}
