use crate::{
    db::DbPool,
    entities::{
        category::Entity as CategoryEntity,
        offer::{self, Entity as OfferEntity},
        offer_item::{self, Entity as OfferItemEntity},
        product::{self, Entity as ProductEntity},
        product_variant::{self, Entity as VariantEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{OfferScope, OfferStatus},
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// The single best-of rule: the highest discount percentage wins, offers
/// never stack. Every path that prices a variant goes through this function.
pub fn best_discount(offers: &[offer::Model]) -> Option<i32> {
    offers
        .iter()
        .map(|o| o.discount_percent)
        .filter(|p| (1..=100).contains(p))
        .max()
}

/// Applies a percentage discount to a base price, rounded to 2 decimal
/// places and clamped so the result never exceeds the base or drops below
/// zero.
pub fn discounted_price(base: Decimal, percent: i32) -> Decimal {
    let pct = Decimal::from(percent.clamp(0, 100));
    let discount = (base * pct / Decimal::from(100)).round_dp(2);
    (base - discount).max(Decimal::ZERO).min(base)
}

/// Whether a calendar-day window is open: inclusive start, exclusive end.
pub fn window_open(starts_on: NaiveDate, ends_on: NaiveDate, today: NaiveDate) -> bool {
    starts_on <= today && today < ends_on
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub name: String,
    pub scope: OfferScope,
    pub discount_percent: i32,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    /// Product ids or category ids, depending on scope.
    pub items: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct OfferResponse {
    #[serde(flatten)]
    pub offer: offer::Model,
    pub items: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct OfferListResponse {
    pub offers: Vec<offer::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Computes and materializes every variant's effective sale price from the
/// set of active offers, and owns the offer admin operations that trigger
/// recomputation. The sweep scheduler is the only other caller that flips
/// offer state; both go through the same recompute entry points so the two
/// paths cannot disagree.
#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl PromotionService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// The materialized effective price of a variant. This is the read path
    /// used by checkout and catalog surfaces; it never recomputes.
    pub async fn resolve_price(&self, variant_id: Uuid) -> Result<Decimal, ServiceError> {
        let variant = VariantEntity::find_by_id(variant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;
        Ok(variant.effective_price)
    }

    /// Creates an offer, activating it immediately when its window is open.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_offer(&self, request: OfferRequest) -> Result<OfferResponse, ServiceError> {
        validate_offer_request(&request)?;
        if request.starts_on < today() {
            return Err(ServiceError::ValidationError(
                "Offer start date cannot be in the past".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        self.reject_overlapping(&txn, &request, None).await?;

        let now = Utc::now();
        let status = if window_open(request.starts_on, request.ends_on, today()) {
            OfferStatus::Active
        } else {
            OfferStatus::Scheduled
        };

        let created = offer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.clone()),
            scope: Set(request.scope.to_string()),
            discount_percent: Set(request.discount_percent),
            starts_on: Set(request.starts_on),
            ends_on: Set(request.ends_on),
            status: Set(status.to_string()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        for item_id in &request.items {
            offer_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                offer_id: Set(created.id),
                item_id: Set(*item_id),
            }
            .insert(&txn)
            .await?;
        }

        if status == OfferStatus::Active {
            self.recompute_for_items(&txn, request.scope, &request.items)
                .await?;
        }
        txn.commit().await?;

        info!(offer_id = %created.id, status = %status, "offer created");
        if status == OfferStatus::Active {
            if let Err(e) = self.event_sender.send(Event::OfferActivated(created.id)).await {
                warn!(error = %e, "failed to send offer activated event");
            }
        }

        Ok(OfferResponse {
            offer: created,
            items: request.items,
        })
    }

    /// Edits an offer in place and recomputes every variant the old or new
    /// item set touches. A manually deactivated offer stays off.
    #[instrument(skip(self, request), fields(offer_id = %offer_id))]
    pub async fn update_offer(
        &self,
        offer_id: Uuid,
        request: OfferRequest,
    ) -> Result<OfferResponse, ServiceError> {
        validate_offer_request(&request)?;

        let txn = self.db.begin().await?;
        let existing = OfferEntity::find_by_id(offer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Offer {} not found", offer_id)))?;
        self.reject_overlapping(&txn, &request, Some(offer_id)).await?;

        let old_scope = parse_scope(&existing.scope)?;
        let old_status = parse_status(&existing.status)?;
        let old_items: Vec<Uuid> = OfferItemEntity::find()
            .filter(offer_item::Column::OfferId.eq(offer_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| m.item_id)
            .collect();

        let new_status = match old_status {
            OfferStatus::ManuallyOff => OfferStatus::ManuallyOff,
            _ => derive_window_status(request.starts_on, request.ends_on, today()),
        };

        let mut active: offer::ActiveModel = existing.into();
        active.name = Set(request.name.clone());
        active.scope = Set(request.scope.to_string());
        active.discount_percent = Set(request.discount_percent);
        active.starts_on = Set(request.starts_on);
        active.ends_on = Set(request.ends_on);
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        OfferItemEntity::delete_many()
            .filter(offer_item::Column::OfferId.eq(offer_id))
            .exec(&txn)
            .await?;
        for item_id in &request.items {
            offer_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                offer_id: Set(offer_id),
                item_id: Set(*item_id),
            }
            .insert(&txn)
            .await?;
        }

        // Variants the offer used to discount must be re-resolved against the
        // remaining offers, not reset; the new item set needs resolving too.
        self.recompute_for_items(&txn, old_scope, &old_items).await?;
        self.recompute_for_items(&txn, request.scope, &request.items)
            .await?;
        txn.commit().await?;

        info!(offer_id = %offer_id, status = %new_status, "offer updated");
        Ok(OfferResponse {
            offer: updated,
            items: request.items,
        })
    }

    /// Admin toggle. Deactivation marks the offer `manually_off`, which the
    /// sweep will not undo; activation requires the window to be open.
    #[instrument(skip(self), fields(offer_id = %offer_id))]
    pub async fn set_offer_active(
        &self,
        offer_id: Uuid,
        activate: bool,
    ) -> Result<offer::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let existing = OfferEntity::find_by_id(offer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Offer {} not found", offer_id)))?;
        let scope = parse_scope(&existing.scope)?;
        let status = parse_status(&existing.status)?;

        let new_status = if activate {
            if status == OfferStatus::Active {
                return Err(ServiceError::Conflict("Offer is already active".to_string()));
            }
            if !window_open(existing.starts_on, existing.ends_on, today()) {
                return Err(ServiceError::ValidationError(
                    "Offer window is not open".to_string(),
                ));
            }
            OfferStatus::Active
        } else {
            if status == OfferStatus::Expired {
                return Err(ServiceError::Conflict(
                    "Offer has already expired".to_string(),
                ));
            }
            OfferStatus::ManuallyOff
        };

        let items: Vec<Uuid> = OfferItemEntity::find()
            .filter(offer_item::Column::OfferId.eq(offer_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| m.item_id)
            .collect();

        let mut active: offer::ActiveModel = existing.into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        self.recompute_for_items(&txn, scope, &items).await?;
        txn.commit().await?;

        let event = if activate {
            Event::OfferActivated(offer_id)
        } else {
            Event::OfferDeactivated(offer_id)
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to send offer toggle event");
        }
        info!(offer_id = %offer_id, status = %new_status, "offer status changed");
        Ok(updated)
    }

    pub async fn list_offers(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OfferListResponse, ServiceError> {
        let paginator = OfferEntity::find()
            .order_by_desc(offer::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let offers = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(OfferListResponse {
            offers,
            total,
            page,
            per_page,
        })
    }

    /// Sweep entry point: flips an offer to `active` and recomputes.
    pub(crate) async fn sweep_activate(&self, offer_id: Uuid) -> Result<(), ServiceError> {
        self.sweep_flip(offer_id, OfferStatus::Active).await?;
        if let Err(e) = self.event_sender.send(Event::OfferActivated(offer_id)).await {
            warn!(error = %e, "failed to send offer activated event");
        }
        Ok(())
    }

    /// Sweep entry point: flips an offer to `expired` and recomputes.
    pub(crate) async fn sweep_expire(&self, offer_id: Uuid) -> Result<(), ServiceError> {
        self.sweep_flip(offer_id, OfferStatus::Expired).await?;
        if let Err(e) = self.event_sender.send(Event::OfferExpired(offer_id)).await {
            warn!(error = %e, "failed to send offer expired event");
        }
        Ok(())
    }

    async fn sweep_flip(&self, offer_id: Uuid, to: OfferStatus) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let existing = OfferEntity::find_by_id(offer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Offer {} not found", offer_id)))?;
        let scope = parse_scope(&existing.scope)?;
        let items: Vec<Uuid> = OfferItemEntity::find()
            .filter(offer_item::Column::OfferId.eq(offer_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| m.item_id)
            .collect();

        let mut active: offer::ActiveModel = existing.into();
        active.status = Set(to.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        self.recompute_for_items(&txn, scope, &items).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Recomputes the effective price of one variant against the currently
    /// active offers. Fails closed: unresolvable references mean "no
    /// discount", never an error on the pricing path.
    pub async fn recompute_variant<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let variant = VariantEntity::find_by_id(variant_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;
        self.recompute_loaded_variant(conn, variant).await
    }

    async fn recompute_loaded_variant<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant: product_variant::Model,
    ) -> Result<Decimal, ServiceError> {
        let base = variant.base_price;

        let effective = match ProductEntity::find_by_id(variant.product_id).one(conn).await? {
            Some(product) => {
                let offers = self
                    .active_offers_for(conn, product.id, product.category_id)
                    .await?;
                match best_discount(&offers) {
                    Some(percent) => discounted_price(base, percent),
                    None => base,
                }
            }
            None => {
                warn!(
                    variant_id = %variant.id,
                    product_id = %variant.product_id,
                    "product missing during price recompute; falling back to base price"
                );
                base
            }
        };

        if effective != variant.effective_price {
            let variant_id = variant.id;
            let mut active: product_variant::ActiveModel = variant.into();
            active.effective_price = Set(effective);
            active.updated_at = Set(Some(Utc::now()));
            active.update(conn).await?;

            if let Err(e) = self
                .event_sender
                .send(Event::PriceRecomputed {
                    variant_id,
                    effective_price: effective,
                })
                .await
            {
                warn!(error = %e, "failed to send price recomputed event");
            }
        }
        Ok(effective)
    }

    /// Active offers whose scope covers this product directly or through its
    /// category.
    async fn active_offers_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        category_id: Uuid,
    ) -> Result<Vec<offer::Model>, ServiceError> {
        let memberships = OfferItemEntity::find()
            .filter(offer_item::Column::ItemId.is_in([product_id, category_id]))
            .all(conn)
            .await?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }

        let mut product_offers: HashSet<Uuid> = HashSet::new();
        let mut category_offers: HashSet<Uuid> = HashSet::new();
        for m in &memberships {
            if m.item_id == product_id {
                product_offers.insert(m.offer_id);
            }
            if m.item_id == category_id {
                category_offers.insert(m.offer_id);
            }
        }

        let ids: Vec<Uuid> = product_offers.union(&category_offers).copied().collect();
        let mut offers = OfferEntity::find()
            .filter(offer::Column::Id.is_in(ids))
            .filter(offer::Column::Status.eq(OfferStatus::Active.to_string()))
            .all(conn)
            .await?;

        offers.retain(|o| match OfferScope::from_str(&o.scope) {
            Ok(OfferScope::Product) => product_offers.contains(&o.id),
            Ok(OfferScope::Category) => category_offers.contains(&o.id),
            Err(_) => {
                warn!(offer_id = %o.id, scope = %o.scope, "offer has unknown scope; ignoring");
                false
            }
        });
        Ok(offers)
    }

    async fn recompute_for_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: OfferScope,
        items: &[Uuid],
    ) -> Result<(), ServiceError> {
        for item_id in items {
            match scope {
                OfferScope::Product => self.recompute_product(conn, *item_id).await?,
                OfferScope::Category => self.recompute_category(conn, *item_id).await?,
            }
        }
        Ok(())
    }

    async fn recompute_product<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        let variants = VariantEntity::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .all(conn)
            .await?;
        if variants.is_empty() && ProductEntity::find_by_id(product_id).one(conn).await?.is_none() {
            warn!(product_id = %product_id, "offer references missing product; skipping");
            return Ok(());
        }
        for variant in variants {
            self.recompute_loaded_variant(conn, variant).await?;
        }
        Ok(())
    }

    async fn recompute_category<C: ConnectionTrait>(
        &self,
        conn: &C,
        category_id: Uuid,
    ) -> Result<(), ServiceError> {
        if CategoryEntity::find_by_id(category_id).one(conn).await?.is_none() {
            warn!(category_id = %category_id, "offer references missing category; skipping");
            return Ok(());
        }
        let products = ProductEntity::find()
            .filter(product::Column::CategoryId.eq(category_id))
            .all(conn)
            .await?;
        for p in products {
            self.recompute_product(conn, p.id).await?;
        }
        Ok(())
    }

    /// Rejects a new/edited offer whose item set collides with a live offer
    /// of the same scope in an overlapping window.
    async fn reject_overlapping<C: ConnectionTrait>(
        &self,
        conn: &C,
        request: &OfferRequest,
        exclude: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let candidate_ids: Vec<Uuid> = OfferItemEntity::find()
            .filter(offer_item::Column::ItemId.is_in(request.items.clone()))
            .all(conn)
            .await?
            .into_iter()
            .map(|m| m.offer_id)
            .filter(|id| Some(*id) != exclude)
            .collect();
        if candidate_ids.is_empty() {
            return Ok(());
        }

        let live = [
            OfferStatus::Scheduled.to_string(),
            OfferStatus::Active.to_string(),
        ];
        let clash = OfferEntity::find()
            .filter(offer::Column::Id.is_in(candidate_ids))
            .filter(offer::Column::Scope.eq(request.scope.to_string()))
            .filter(offer::Column::Status.is_in(live))
            .filter(offer::Column::StartsOn.lt(request.ends_on))
            .filter(offer::Column::EndsOn.gt(request.starts_on))
            .one(conn)
            .await?;

        if clash.is_some() {
            return Err(ServiceError::Conflict(
                "An active offer already exists for one or more selected items".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_offer_request(request: &OfferRequest) -> Result<(), ServiceError> {
    if request.name.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "Offer name is required".to_string(),
        ));
    }
    if !(1..=100).contains(&request.discount_percent) {
        return Err(ServiceError::ValidationError(
            "Discount percentage must be between 1 and 100".to_string(),
        ));
    }
    if request.ends_on <= request.starts_on {
        return Err(ServiceError::ValidationError(
            "Offer end date must be after start date".to_string(),
        ));
    }
    if request.items.is_empty() {
        return Err(ServiceError::ValidationError(
            "Offer must cover at least one item".to_string(),
        ));
    }
    Ok(())
}

fn derive_window_status(starts_on: NaiveDate, ends_on: NaiveDate, today: NaiveDate) -> OfferStatus {
    if today >= ends_on {
        OfferStatus::Expired
    } else if today >= starts_on {
        OfferStatus::Active
    } else {
        OfferStatus::Scheduled
    }
}

fn parse_scope(raw: &str) -> Result<OfferScope, ServiceError> {
    OfferScope::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("Unknown offer scope {}", raw)))
}

fn parse_status(raw: &str) -> Result<OfferStatus, ServiceError> {
    OfferStatus::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("Unknown offer status {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn offer_with(percent: i32) -> offer::Model {
        offer::Model {
            id: Uuid::new_v4(),
            name: format!("{}% off", percent),
            scope: OfferScope::Product.to_string(),
            discount_percent: percent,
            starts_on: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            status: OfferStatus::Active.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn best_discount_picks_highest_never_stacks() {
        let offers = vec![offer_with(20), offer_with(35)];
        assert_eq!(best_discount(&offers), Some(35));
    }

    #[test]
    fn best_discount_empty_is_none() {
        assert_eq!(best_discount(&[]), None);
    }

    #[test]
    fn best_discount_ignores_out_of_range_percentages() {
        let offers = vec![offer_with(0), offer_with(250)];
        assert_eq!(best_discount(&offers), None);
    }

    #[rstest::rstest]
    #[case(dec!(100), 35, dec!(65.00))]
    #[case(dec!(99.99), 10, dec!(89.99))]
    #[case(dec!(10), 100, dec!(0))]
    #[case(dec!(10), 0, dec!(10))]
    fn discounted_price_rounds_and_clamps(
        #[case] base: Decimal,
        #[case] percent: i32,
        #[case] expected: Decimal,
    ) {
        assert_eq!(discounted_price(base, percent), expected);
    }

    #[test]
    fn window_is_inclusive_start_exclusive_end() {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        assert!(window_open(start, end, start));
        assert!(window_open(start, end, NaiveDate::from_ymd_opt(2024, 6, 9).unwrap()));
        assert!(!window_open(start, end, end));
        assert!(!window_open(start, end, NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()));
    }

    #[test]
    fn window_status_is_total() {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let before = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let during = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        let after = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert_eq!(derive_window_status(start, end, before), OfferStatus::Scheduled);
        assert_eq!(derive_window_status(start, end, during), OfferStatus::Active);
        assert_eq!(derive_window_status(start, end, after), OfferStatus::Expired);
    }
}
