use crate::{
    entities::discount_code,
    errors::ServiceError,
    services::discount_codes::{CodeQuote, CodeRequest},
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ValidateCodeBody {
    pub code: String,
    pub account_id: Uuid,
    pub subtotal: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    pub account_id: Uuid,
}

/// Quotes what a code would take off a subtotal, without consuming it.
pub async fn validate_code(
    State(state): State<AppState>,
    Json(payload): Json<ValidateCodeBody>,
) -> Result<Json<ApiResponse<CodeQuote>>, ServiceError> {
    let quote = state
        .services
        .discount_codes
        .validate(&payload.code, payload.account_id, payload.subtotal)
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}

pub async fn available_codes(
    State(state): State<AppState>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<ApiResponse<Vec<discount_code::Model>>>, ServiceError> {
    let codes = state
        .services
        .discount_codes
        .available_codes(query.account_id)
        .await?;
    Ok(Json(ApiResponse::success(codes)))
}

pub async fn create_code(
    State(state): State<AppState>,
    Json(payload): Json<CodeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<discount_code::Model>>), ServiceError> {
    let code = state.services.discount_codes.create_code(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(code))))
}

pub async fn update_code(
    State(state): State<AppState>,
    Path(code_id): Path<Uuid>,
    Json(payload): Json<CodeRequest>,
) -> Result<Json<ApiResponse<discount_code::Model>>, ServiceError> {
    let code = state
        .services
        .discount_codes
        .update_code(code_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(code)))
}

pub async fn toggle_code(
    State(state): State<AppState>,
    Path(code_id): Path<Uuid>,
) -> Result<Json<ApiResponse<discount_code::Model>>, ServiceError> {
    let code = state.services.discount_codes.toggle_code(code_id).await?;
    Ok(Json(ApiResponse::success(code)))
}
