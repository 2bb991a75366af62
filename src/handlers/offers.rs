use crate::{
    entities::offer,
    errors::ServiceError,
    services::promotions::{OfferListResponse, OfferRequest, OfferResponse},
    ApiResponse, AppState, ListQuery,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

pub async fn create_offer(
    State(state): State<AppState>,
    Json(payload): Json<OfferRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OfferResponse>>), ServiceError> {
    let offer = state.services.promotions.create_offer(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(offer))))
}

pub async fn list_offers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<OfferListResponse>>, ServiceError> {
    let offers = state
        .services
        .promotions
        .list_offers(query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(offers)))
}

pub async fn update_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
    Json(payload): Json<OfferRequest>,
) -> Result<Json<ApiResponse<OfferResponse>>, ServiceError> {
    let offer = state
        .services
        .promotions
        .update_offer(offer_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(offer)))
}

pub async fn activate_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<ApiResponse<offer::Model>>, ServiceError> {
    let offer = state
        .services
        .promotions
        .set_offer_active(offer_id, true)
        .await?;
    Ok(Json(ApiResponse::success(offer)))
}

pub async fn deactivate_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<ApiResponse<offer::Model>>, ServiceError> {
    let offer = state
        .services
        .promotions
        .set_offer_active(offer_id, false)
        .await?;
    Ok(Json(ApiResponse::success(offer)))
}
