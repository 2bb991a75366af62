use crate::{
    entities::wallet_transaction, errors::ServiceError, ApiResponse, AppState,
};
use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: Decimal,
}

/// The derived wallet balance; an account without a wallet reads as zero.
pub async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiResponse<BalanceResponse>>, ServiceError> {
    let balance = state.services.ledger.balance(account_id).await?;
    Ok(Json(ApiResponse::success(BalanceResponse {
        account_id,
        balance,
    })))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<wallet_transaction::Model>>>, ServiceError> {
    let transactions = state.services.ledger.transactions(account_id).await?;
    Ok(Json(ApiResponse::success(transactions)))
}
