//! In-process domain event bus.
//!
//! Services emit events after their transaction commits; a spawned consumer
//! logs them. Outbound notification delivery (email, webhooks) is a
//! fire-and-forget collaborator outside this crate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order lifecycle
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),

    // Returns
    ReturnRequested {
        order_id: Uuid,
        item_id: Uuid,
    },
    ReturnApproved {
        order_id: Uuid,
        item_id: Uuid,
        refund_amount: Decimal,
    },
    ReturnRejected {
        order_id: Uuid,
        item_id: Uuid,
    },

    // Stock
    StockReserved {
        variant_id: Uuid,
        quantity: i32,
        order_id: Uuid,
    },
    StockReleased {
        variant_id: Uuid,
        quantity: i32,
        order_id: Uuid,
    },

    // Promotions
    OfferActivated(Uuid),
    OfferDeactivated(Uuid),
    OfferExpired(Uuid),
    DiscountCodeExpired(Uuid),
    PriceRecomputed {
        variant_id: Uuid,
        effective_price: Decimal,
    },

    // Wallet ledger
    WalletCredited {
        account_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
    },
    WalletDebited {
        account_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; a full or closed channel is reported, never panicked on.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bus and its receiving end with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = %payload, "domain event"),
            Err(e) => warn!(error = %e, "failed to serialize domain event"),
        }
    }
    info!("event channel closed; consumer exiting");
}
