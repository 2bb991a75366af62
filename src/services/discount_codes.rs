use crate::{
    db::DbPool,
    entities::{
        discount_code::{self, Entity as CodeEntity},
        discount_code_usage::{self, Entity as UsageEntity},
    },
    errors::ServiceError,
    events::EventSender,
    models::DiscountType,
};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const MAX_CODE_DURATION_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRequest {
    pub code: String,
    pub description: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_order_amount: Decimal,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

/// Result of a successful validation: what the code would take off a given
/// subtotal. Validation does not consume the code; `mark_used` does.
#[derive(Debug, Clone, Serialize)]
pub struct CodeQuote {
    pub code_id: Uuid,
    pub code: String,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// Validates and manages one-time-per-account discount codes.
#[derive(Clone)]
pub struct DiscountCodeService {
    db: Arc<DbPool>,
    #[allow(dead_code)]
    event_sender: EventSender,
}

impl DiscountCodeService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Checks a code's eligibility for an account and subtotal and computes
    /// the order-level discount. Does not consume the code.
    #[instrument(skip(self), fields(code = %code))]
    pub async fn validate(
        &self,
        code: &str,
        account_id: Uuid,
        subtotal: Decimal,
    ) -> Result<CodeQuote, ServiceError> {
        self.validate_with_conn(&*self.db, code, account_id, subtotal)
            .await
    }

    pub async fn validate_with_conn<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        account_id: Uuid,
        subtotal: Decimal,
    ) -> Result<CodeQuote, ServiceError> {
        let normalized = code.trim().to_ascii_uppercase();
        let model = CodeEntity::find()
            .filter(discount_code::Column::Code.eq(normalized.clone()))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::InvalidCode(normalized.clone()))?;

        let today = Utc::now().date_naive();
        if model.is_expired || today < model.starts_on || today > model.ends_on {
            return Err(ServiceError::InvalidCode(normalized));
        }

        let used = UsageEntity::find()
            .filter(discount_code_usage::Column::CodeId.eq(model.id))
            .filter(discount_code_usage::Column::AccountId.eq(account_id))
            .one(conn)
            .await?;
        if used.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Discount code {} already used by this account",
                normalized
            )));
        }

        if subtotal < model.min_order_amount {
            return Err(ServiceError::MinimumNotMet {
                required: model.min_order_amount,
                shortfall: model.min_order_amount - subtotal,
            });
        }

        let discount_type = DiscountType::from_str(&model.discount_type).map_err(|_| {
            ServiceError::InternalError(format!(
                "Code {} has unknown discount type {}",
                model.id, model.discount_type
            ))
        })?;
        let discount_amount = match discount_type {
            DiscountType::Percentage => (subtotal * model.value / Decimal::from(100)).round_dp(2),
            // Fixed amounts are capped so the order never goes negative.
            DiscountType::Fixed => model.value.min(subtotal),
        };

        Ok(CodeQuote {
            code_id: model.id,
            code: model.code,
            discount_amount,
            final_amount: subtotal - discount_amount,
        })
    }

    /// Consumes the code for an account. Explicitly separate from `validate`;
    /// a second call for the same account is rejected.
    pub async fn mark_used(
        &self,
        code_id: Uuid,
        account_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        self.mark_used_with_conn(&*self.db, code_id, account_id, order_id)
            .await
    }

    pub async fn mark_used_with_conn<C: ConnectionTrait>(
        &self,
        conn: &C,
        code_id: Uuid,
        account_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let code = CodeEntity::find_by_id(code_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Discount code {} not found", code_id)))?;

        let existing = UsageEntity::find()
            .filter(discount_code_usage::Column::CodeId.eq(code_id))
            .filter(discount_code_usage::Column::AccountId.eq(account_id))
            .one(conn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Discount code {} already used by this account",
                code.code
            )));
        }

        discount_code_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            code_id: Set(code_id),
            account_id: Set(account_id),
            order_id: Set(order_id),
            used_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        info!(code_id = %code_id, account_id = %account_id, "discount code marked used");
        Ok(())
    }

    /// Creates a code after the admin-side sanity checks.
    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_code(
        &self,
        request: CodeRequest,
    ) -> Result<discount_code::Model, ServiceError> {
        let code = normalize_and_check_format(&request.code)?;
        validate_code_request(&request)?;

        let today = Utc::now().date_naive();
        if request.starts_on < today {
            return Err(ServiceError::ValidationError(
                "Start date cannot be in the past".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let existing = CodeEntity::find()
            .filter(discount_code::Column::Code.eq(code.clone()))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Discount code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let created = discount_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            description: Set(request.description.clone()),
            discount_type: Set(request.discount_type.to_string()),
            value: Set(request.value),
            min_order_amount: Set(request.min_order_amount),
            starts_on: Set(request.starts_on),
            ends_on: Set(request.ends_on),
            is_expired: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(code_id = %created.id, "discount code created");
        Ok(created)
    }

    /// Full update of an existing code; resets the expired flag, matching the
    /// admin expectation that an edited code is live again within its window.
    #[instrument(skip(self, request), fields(code_id = %code_id))]
    pub async fn update_code(
        &self,
        code_id: Uuid,
        request: CodeRequest,
    ) -> Result<discount_code::Model, ServiceError> {
        let code = normalize_and_check_format(&request.code)?;
        validate_code_request(&request)?;

        let txn = self.db.begin().await?;
        let existing = CodeEntity::find_by_id(code_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Discount code {} not found", code_id)))?;

        let clash = CodeEntity::find()
            .filter(discount_code::Column::Code.eq(code.clone()))
            .filter(discount_code::Column::Id.ne(code_id))
            .one(&txn)
            .await?;
        if clash.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Discount code {} already exists",
                code
            )));
        }

        let mut active: discount_code::ActiveModel = existing.into();
        active.code = Set(code);
        active.description = Set(request.description.clone());
        active.discount_type = Set(request.discount_type.to_string());
        active.value = Set(request.value);
        active.min_order_amount = Set(request.min_order_amount);
        active.starts_on = Set(request.starts_on);
        active.ends_on = Set(request.ends_on);
        active.is_expired = Set(false);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(code_id = %code_id, "discount code updated");
        Ok(updated)
    }

    /// Admin enable/disable. Codes whose window has already closed cannot be
    /// toggled back to life.
    pub async fn toggle_code(&self, code_id: Uuid) -> Result<discount_code::Model, ServiceError> {
        let existing = CodeEntity::find_by_id(code_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Discount code {} not found", code_id)))?;

        let today = Utc::now().date_naive();
        if existing.ends_on < today {
            return Err(ServiceError::Conflict(
                "Cannot toggle status of an expired discount code".to_string(),
            ));
        }

        let flipped = !existing.is_expired;
        let mut active: discount_code::ActiveModel = existing.into();
        active.is_expired = Set(flipped);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(&*self.db).await?)
    }

    /// Codes the account could apply right now.
    pub async fn available_codes(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<discount_code::Model>, ServiceError> {
        let today = Utc::now().date_naive();
        let live = CodeEntity::find()
            .filter(discount_code::Column::IsExpired.eq(false))
            .filter(discount_code::Column::StartsOn.lte(today))
            .filter(discount_code::Column::EndsOn.gte(today))
            .order_by_desc(discount_code::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        if live.is_empty() {
            return Ok(live);
        }

        let used: Vec<Uuid> = UsageEntity::find()
            .filter(discount_code_usage::Column::AccountId.eq(account_id))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|u| u.code_id)
            .collect();
        Ok(live.into_iter().filter(|c| !used.contains(&c.id)).collect())
    }
}

/// Codes are 6-12 uppercase letters and digits.
fn normalize_and_check_format(raw: &str) -> Result<String, ServiceError> {
    let code = raw.trim().to_ascii_uppercase();
    let ok = (6..=12).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !ok {
        return Err(ServiceError::ValidationError(
            "Code must be 6-12 characters of uppercase letters and numbers".to_string(),
        ));
    }
    Ok(code)
}

fn validate_code_request(request: &CodeRequest) -> Result<(), ServiceError> {
    if request.description.len() < 10 || request.description.len() > 200 {
        return Err(ServiceError::ValidationError(
            "Description must be between 10 and 200 characters".to_string(),
        ));
    }
    match request.discount_type {
        DiscountType::Percentage => {
            if request.value <= Decimal::ZERO || request.value > Decimal::from(100) {
                return Err(ServiceError::ValidationError(
                    "Percentage discount must be between 0 and 100".to_string(),
                ));
            }
        }
        DiscountType::Fixed => {
            if request.value <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Fixed discount amount must be greater than 0".to_string(),
                ));
            }
            if request.value >= request.min_order_amount {
                return Err(ServiceError::ValidationError(
                    "Fixed discount amount must be less than minimum order amount".to_string(),
                ));
            }
        }
    }
    if request.min_order_amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Minimum order amount must be positive".to_string(),
        ));
    }
    if request.ends_on <= request.starts_on {
        return Err(ServiceError::ValidationError(
            "End date must be after start date".to_string(),
        ));
    }
    if request.ends_on - request.starts_on > Duration::days(MAX_CODE_DURATION_DAYS) {
        return Err(ServiceError::ValidationError(
            "Code duration cannot exceed 1 year".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(discount_type: DiscountType, value: Decimal) -> CodeRequest {
        CodeRequest {
            code: "WELCOME10".to_string(),
            description: "Welcome discount for new shoppers".to_string(),
            discount_type,
            value,
            min_order_amount: dec!(500),
            starts_on: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
        }
    }

    #[test]
    fn code_format_is_normalized_and_checked() {
        assert_eq!(normalize_and_check_format(" welcome10 ").unwrap(), "WELCOME10");
        assert!(normalize_and_check_format("ab").is_err());
        assert!(normalize_and_check_format("HAS SPACES").is_err());
        assert!(normalize_and_check_format("WAYTOOLONGCODE").is_err());
    }

    #[test]
    fn percentage_value_bounds() {
        assert!(validate_code_request(&request(DiscountType::Percentage, dec!(10))).is_ok());
        assert!(validate_code_request(&request(DiscountType::Percentage, dec!(0))).is_err());
        assert!(validate_code_request(&request(DiscountType::Percentage, dec!(101))).is_err());
    }

    #[test]
    fn fixed_value_must_be_below_minimum_order() {
        assert!(validate_code_request(&request(DiscountType::Fixed, dec!(100))).is_ok());
        assert!(validate_code_request(&request(DiscountType::Fixed, dec!(500))).is_err());
    }

    #[test]
    fn duration_capped_at_one_year() {
        let mut req = request(DiscountType::Percentage, dec!(10));
        req.ends_on = NaiveDate::from_ymd_opt(2031, 6, 1).unwrap();
        assert!(validate_code_request(&req).is_err());
    }
}
