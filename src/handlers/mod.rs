pub mod discount_codes;
pub mod health;
pub mod offers;
pub mod orders;
pub mod prices;
pub mod wallet;

use crate::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};

/// Customer-facing API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/variants/:id/price", get(prices::get_variant_price))
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route(
            "/orders/:id/items/:item_id/return",
            post(orders::submit_return),
        )
        .route("/discount-codes/validate", post(discount_codes::validate_code))
        .route("/discount-codes/available", get(discount_codes::available_codes))
        .route("/wallet/:account_id/balance", get(wallet::get_balance))
        .route(
            "/wallet/:account_id/transactions",
            get(wallet::list_transactions),
        )
}

/// Back-office surface. Operator authentication terminates at the gateway in
/// front of this service.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/offers", post(offers::create_offer).get(offers::list_offers))
        .route("/offers/:id", put(offers::update_offer))
        .route("/offers/:id/activate", post(offers::activate_offer))
        .route("/offers/:id/deactivate", post(offers::deactivate_offer))
        .route("/discount-codes", post(discount_codes::create_code))
        .route("/discount-codes/:id", put(discount_codes::update_code))
        .route("/discount-codes/:id/toggle", post(discount_codes::toggle_code))
        .route("/orders/:id/status", put(orders::update_order_status))
        .route(
            "/orders/:id/items/:item_id/return/verify",
            post(orders::verify_return),
        )
}

/// Full application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api_v1_routes())
        .nest("/admin", admin_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
