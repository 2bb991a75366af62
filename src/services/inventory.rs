use crate::{
    entities::product_variant::{self, Entity as VariantEntity},
    errors::ServiceError,
    events::EventSender,
};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;

/// Per-variant stock counter with reservation/restoration semantics.
///
/// Both mutations are single conditional `UPDATE` statements, so two
/// concurrent `reserve` calls for the last unit cannot both succeed: the
/// database serializes them and the loser sees zero affected rows. Callers
/// running inside an order transaction pass that transaction as `conn`, which
/// ties the stock movement to the order's commit or rollback.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
    #[allow(dead_code)]
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Atomically decrements stock if at least `quantity` units remain.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        let result = VariantEntity::update_many()
            .col_expr(
                product_variant::Column::Stock,
                Expr::col(product_variant::Column::Stock).sub(quantity),
            )
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::Stock.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // Distinguish a missing variant from an out-of-stock one.
            let variant = VariantEntity::find_by_id(variant_id).one(conn).await?;
            return match variant {
                Some(v) => Err(ServiceError::InsufficientStock(format!(
                    "Variant {} has {} in stock, requested {}",
                    variant_id, v.stock, quantity
                ))),
                None => Err(ServiceError::NotFound(format!(
                    "Variant {} not found",
                    variant_id
                ))),
            };
        }

        debug!(variant_id = %variant_id, quantity, "stock reserved");
        Ok(())
    }

    /// Atomically increments stock. Releases always succeed; an over-release
    /// is a caller bug, so the post-release level is logged for auditing.
    #[instrument(skip(self, conn))]
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Release quantity must be positive".to_string(),
            ));
        }

        let result = VariantEntity::update_many()
            .col_expr(
                product_variant::Column::Stock,
                Expr::col(product_variant::Column::Stock).add(quantity),
            )
            .filter(product_variant::Column::Id.eq(variant_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Variant {} not found",
                variant_id
            )));
        }

        if let Some(variant) = VariantEntity::find_by_id(variant_id).one(conn).await? {
            debug!(variant_id = %variant_id, quantity, stock = variant.stock, "stock released");
        } else {
            warn!(variant_id = %variant_id, "variant vanished after release");
        }
        Ok(())
    }

    /// Current stock level, for availability checks outside checkout. The
    /// checkout path never relies on this read; it reserves atomically.
    pub async fn available(&self, variant_id: Uuid) -> Result<i32, ServiceError> {
        let variant = VariantEntity::find_by_id(variant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;
        Ok(variant.stock)
    }
}
