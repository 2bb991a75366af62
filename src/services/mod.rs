pub mod discount_codes;
pub mod inventory;
pub mod ledger;
pub mod orders;
pub mod promotions;
pub mod sweep;

use crate::{config::AppConfig, db::DbPool, events::EventSender};
use std::sync::Arc;

/// All domain services, wired once at startup and cloned into handlers.
#[derive(Clone)]
pub struct AppServices {
    pub promotions: promotions::PromotionService,
    pub discount_codes: discount_codes::DiscountCodeService,
    pub inventory: inventory::InventoryService,
    pub ledger: ledger::LedgerService,
    pub orders: orders::OrderService,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        let promotions = promotions::PromotionService::new(db.clone(), event_sender.clone());
        let discount_codes =
            discount_codes::DiscountCodeService::new(db.clone(), event_sender.clone());
        let inventory = inventory::InventoryService::new(db.clone(), event_sender.clone());
        let ledger = ledger::LedgerService::new(
            db.clone(),
            event_sender.clone(),
            config.wallet_currency.clone(),
        );
        let orders = orders::OrderService::new(
            db,
            event_sender,
            inventory.clone(),
            ledger.clone(),
            discount_codes.clone(),
        );
        Self {
            promotions,
            discount_codes,
            inventory,
            ledger,
            orders,
        }
    }

    /// Builds the sweep scheduler sharing this service set's promotion
    /// service, so sweep-driven flips recompute prices the same way admin
    /// flips do.
    pub fn sweep_scheduler(
        &self,
        db: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> sweep::SweepScheduler {
        sweep::SweepScheduler::new(
            db,
            event_sender,
            self.promotions.clone(),
            config.sweep_interval(),
            config.sweep_reactivate_manual,
        )
    }
}
