use crate::{
    errors::ServiceError,
    models::OrderStatus,
    services::orders::{CreateOrderRequest, OrderListResponse, OrderResponse},
    ApiResponse, AppState, ListQuery,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account_id: Uuid,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl AccountQuery {
    fn list(&self) -> ListQuery {
        let defaults = ListQuery::default();
        ListQuery {
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderBody {
    /// Absent for back-office cancellations; present for customer ones, where
    /// it must match the order's account.
    pub account_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct SubmitReturnBody {
    pub account_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyReturnBody {
    pub approve: bool,
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state.services.orders.create_order(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id, Some(query.account_id))
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(query.account_id, query.list().page, query.list().limit)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<CancelOrderBody>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order(order_id, payload.account_id, payload.reason)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusBody>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_status(order_id, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn submit_return(
    State(state): State<AppState>,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SubmitReturnBody>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .submit_return(order_id, item_id, payload.account_id, payload.reason)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn verify_return(
    State(state): State<AppState>,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<VerifyReturnBody>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .verify_return(order_id, item_id, payload.approve)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
