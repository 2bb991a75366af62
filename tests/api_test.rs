mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

/// Money comes back as a JSON string; compare numerically so representation
/// differences between backends cannot fail the test.
fn as_decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {value}"))
        .parse()
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_database_up() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn price_endpoint_serves_the_effective_price() {
    let app = TestApp::new().await;
    let category = app.seed_category("stationery").await;
    let product = app.seed_product(category, "notebook").await;
    let variant = app.seed_variant(product, "ST-001", dec!(12.50), 3).await;

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/variants/{variant}/price"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_decimal(&body["data"]["effective_price"]), dec!(12.50));

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/variants/{}/price", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_lifecycle_over_http() {
    let app = TestApp::new().await;
    let category = app.seed_category("shoes").await;
    let product = app.seed_product(category, "sneaker").await;
    let variant = app.seed_variant(product, "SH-001", dec!(60.00), 4).await;
    let account = Uuid::new_v4();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "account_id": account,
                "items": [{"variant_id": variant, "quantity": 2}],
                "shipping_address": "1 Main Street, Anytown",
                "payment_method": "cod",
                "discount_code": null,
                "notes": null,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(as_decimal(&body["data"]["total_amount"]), dec!(120.00));
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{order_id}?account_id={account}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");

    // Strangers cannot read it.
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{order_id}?account_id={}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin advances fulfillment.
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/admin/orders/{order_id}/status"),
            Some(json!({"status": "shipped"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["data"]["status"], "shipped");

    // An illegal jump maps to 409.
    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/admin/orders/{order_id}/status"),
            Some(json!({"status": "pending"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn wallet_endpoints_expose_balance_and_history() {
    let app = TestApp::new().await;
    let account = Uuid::new_v4();
    app.fund_wallet(account, dec!(250.00)).await;

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/wallet/{account}/balance"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_decimal(&body["data"]["balance"]), dec!(250.00));

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/wallet/{account}/transactions"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn discount_code_validation_over_http() {
    let app = TestApp::new().await;
    let today = chrono::Utc::now().date_naive();
    app.seed_code(
        "HTTP10",
        "percentage",
        dec!(10),
        dec!(50),
        today,
        today + chrono::Duration::days(7),
        false,
    )
    .await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/discount-codes/validate",
            Some(json!({
                "code": "HTTP10",
                "account_id": Uuid::new_v4(),
                "subtotal": "100.00",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(as_decimal(&body["data"]["discount_amount"]), dec!(10.00));

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/discount-codes/validate",
            Some(json!({
                "code": "MISSING",
                "account_id": Uuid::new_v4(),
                "subtotal": "100.00",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_offer_routes_create_and_list() {
    let app = TestApp::new().await;
    let category = app.seed_category("outdoors").await;
    let product = app.seed_product(category, "tent").await;
    app.seed_variant(product, "OD-001", dec!(300.00), 2).await;

    let today = chrono::Utc::now().date_naive();
    let (status, body) = app
        .request(
            Method::POST,
            "/admin/offers",
            Some(json!({
                "name": "camping sale",
                "scope": "product",
                "discount_percent": 20,
                "starts_on": today,
                "ends_on": today + chrono::Duration::days(10),
                "items": [product],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(body["data"]["status"], "active");

    let (status, body) = app.request(Method::GET, "/admin/offers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
}
