use crate::{
    db::DbPool,
    entities::{
        discount_code::{self, Entity as CodeEntity},
        offer::{self, Entity as OfferEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::OfferStatus,
    services::promotions::PromotionService,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Periodic reconciliation of promotion state against the calendar.
///
/// Each pass activates scheduled offers whose window has opened, expires
/// offers and discount codes whose window has closed, and (only when
/// configured) re-activates manually deactivated promotions that are back in
/// window. Offers flip through [`PromotionService`], which recomputes the
/// affected effective prices in the same transaction as the status change.
#[derive(Clone)]
pub struct SweepScheduler {
    db: Arc<DbPool>,
    event_sender: EventSender,
    promotions: PromotionService,
    interval: Duration,
    reactivate_manual: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub offers_activated: usize,
    pub offers_expired: usize,
    pub codes_expired: usize,
    pub codes_reactivated: usize,
}

impl SweepScheduler {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        promotions: PromotionService,
        interval: Duration,
        reactivate_manual: bool,
    ) -> Self {
        Self {
            db,
            event_sender,
            promotions,
            interval,
            reactivate_manual,
        }
    }

    /// Runs sweep passes forever. A failed pass is logged and the next tick
    /// retries; missed ticks are coalesced rather than replayed in a burst.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "promotion sweep started");
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(report) => {
                    if report != SweepReport::default() {
                        info!(
                            offers_activated = report.offers_activated,
                            offers_expired = report.offers_expired,
                            codes_expired = report.codes_expired,
                            codes_reactivated = report.codes_reactivated,
                            "sweep pass applied changes"
                        );
                    }
                }
                Err(e) => error!(error = %e, "sweep pass failed"),
            }
        }
    }

    /// One full sweep pass for the current date.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport, ServiceError> {
        let today = Utc::now().date_naive();
        let mut report = SweepReport::default();

        report.offers_expired = self.expire_offers(today).await?;
        report.offers_activated = self.activate_offers(today).await?;
        report.codes_expired = self.expire_codes(today).await?;
        if self.reactivate_manual {
            report.codes_reactivated = self.reactivate_codes(today).await?;
        }
        Ok(report)
    }

    /// Offers past their end date, whatever their current live status.
    async fn expire_offers(&self, today: NaiveDate) -> Result<usize, ServiceError> {
        let candidates = OfferEntity::find()
            .filter(
                offer::Column::Status.is_in([
                    OfferStatus::Scheduled.to_string(),
                    OfferStatus::Active.to_string(),
                    OfferStatus::ManuallyOff.to_string(),
                ]),
            )
            .filter(offer::Column::EndsOn.lte(today))
            .all(&*self.db)
            .await?;

        let mut flipped = 0;
        for candidate in candidates {
            // One bad offer must not wedge the whole pass.
            match self.promotions.sweep_expire(candidate.id).await {
                Ok(()) => flipped += 1,
                Err(e) => warn!(offer_id = %candidate.id, error = %e, "failed to expire offer"),
            }
        }
        Ok(flipped)
    }

    /// Scheduled offers whose window has opened. Manually deactivated offers
    /// join only when re-activation is configured.
    async fn activate_offers(&self, today: NaiveDate) -> Result<usize, ServiceError> {
        let mut statuses = vec![OfferStatus::Scheduled.to_string()];
        if self.reactivate_manual {
            statuses.push(OfferStatus::ManuallyOff.to_string());
        }

        let candidates = OfferEntity::find()
            .filter(offer::Column::Status.is_in(statuses))
            .filter(offer::Column::StartsOn.lte(today))
            .filter(offer::Column::EndsOn.gt(today))
            .all(&*self.db)
            .await?;

        let mut flipped = 0;
        for candidate in candidates {
            match self.promotions.sweep_activate(candidate.id).await {
                Ok(()) => flipped += 1,
                Err(e) => warn!(offer_id = %candidate.id, error = %e, "failed to activate offer"),
            }
        }
        Ok(flipped)
    }

    /// Marks codes whose (inclusive) end date has passed.
    async fn expire_codes(&self, today: NaiveDate) -> Result<usize, ServiceError> {
        let candidates = CodeEntity::find()
            .filter(discount_code::Column::IsExpired.eq(false))
            .filter(discount_code::Column::EndsOn.lt(today))
            .all(&*self.db)
            .await?;

        let mut flipped = 0;
        for candidate in candidates {
            let code_id = candidate.id;
            let mut active: discount_code::ActiveModel = candidate.into();
            active.is_expired = Set(true);
            active.updated_at = Set(Some(Utc::now()));
            active.update(&*self.db).await?;
            flipped += 1;

            if let Err(e) = self.event_sender.send(Event::DiscountCodeExpired(code_id)).await {
                warn!(error = %e, "failed to send code expiry event");
            }
            info!(code_id = %code_id, "discount code expired by sweep");
        }
        Ok(flipped)
    }

    /// Clears the expired flag on codes back inside their window. Only runs
    /// when manual re-activation is configured, since the flag also encodes
    /// an admin's manual toggle.
    async fn reactivate_codes(&self, today: NaiveDate) -> Result<usize, ServiceError> {
        let candidates = CodeEntity::find()
            .filter(discount_code::Column::IsExpired.eq(true))
            .filter(discount_code::Column::StartsOn.lte(today))
            .filter(discount_code::Column::EndsOn.gte(today))
            .all(&*self.db)
            .await?;

        let mut flipped = 0;
        for candidate in candidates {
            let code_id = candidate.id;
            let mut active: discount_code::ActiveModel = candidate.into();
            active.is_expired = Set(false);
            active.updated_at = Set(Some(Utc::now()));
            active.update(&*self.db).await?;
            flipped += 1;
            info!(code_id = %code_id, "discount code reactivated by sweep");
        }
        Ok(flipped)
    }
}
