use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{MovementType, TransactionType};

/// Handle used by services to publish events once their unit of work has
/// committed.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Queues an event without waiting, logging instead of failing. The
    /// state change the event describes is already committed at this point,
    /// so a full or closed channel drops the event.
    pub fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.sender.try_send(event) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            counter!("inventory_ledger_events.dropped", 1, "reason" => reason);
            warn!(event = name, reason, "event could not be delivered");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    StockAdjusted {
        product_id: Uuid,
        location_id: Uuid,
        movement_type: MovementType,
        previous_quantity: i32,
        new_quantity: i32,
    },
    StockTransferred {
        product_id: Uuid,
        from_location_id: Uuid,
        to_location_id: Uuid,
        quantity: i32,
    },
    LowStockDetected {
        product_id: Uuid,
        location_id: Uuid,
        available_quantity: i32,
        threshold: i32,
    },
    TransactionCompleted {
        transaction_id: Uuid,
        transaction_number: String,
        transaction_type: TransactionType,
        location_id: Uuid,
    },
    ProductCreated(Uuid),
    ProductDeactivated(Uuid),
    LocationCreated(Uuid),
    LocationDeactivated(Uuid),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StockAdjusted { .. } => "stock_adjusted",
            Event::StockTransferred { .. } => "stock_transferred",
            Event::LowStockDetected { .. } => "low_stock_detected",
            Event::TransactionCompleted { .. } => "transaction_completed",
            Event::ProductCreated(_) => "product_created",
            Event::ProductDeactivated(_) => "product_deactivated",
            Event::LocationCreated(_) => "location_created",
            Event::LocationDeactivated(_) => "location_deactivated",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("inventory_ledger_events.processed", 1, "event" => event.name());

        match &event {
            Event::LowStockDetected {
                product_id,
                location_id,
                available_quantity,
                threshold,
            } => warn!(
                %product_id,
                %location_id,
                available_quantity,
                threshold,
                "low stock"
            ),
            Event::TransactionCompleted {
                transaction_number,
                transaction_type,
                ..
            } => info!(%transaction_number, %transaction_type, "transaction completed"),
            other => info!(event = other.name(), payload = ?other, "event received"),
        }
    }

    info!("Event processing loop stopped");
}
