use crate::{errors::ServiceError, ApiResponse, AppState};
use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub variant_id: Uuid,
    pub effective_price: Decimal,
}

/// The materialized sale price for a variant.
pub async fn get_variant_price(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PriceResponse>>, ServiceError> {
    let effective_price = state.services.promotions.resolve_price(variant_id).await?;
    Ok(Json(ApiResponse::success(PriceResponse {
        variant_id,
        effective_price,
    })))
}
