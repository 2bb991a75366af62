mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_api::errors::ServiceError;
use storefront_api::models::DiscountType;
use storefront_api::services::discount_codes::CodeRequest;
use uuid::Uuid;

fn code_request(code: &str) -> CodeRequest {
    let today = Utc::now().date_naive();
    CodeRequest {
        code: code.to_string(),
        description: "Festive season discount".to_string(),
        discount_type: DiscountType::Percentage,
        value: dec!(10),
        min_order_amount: dec!(100),
        starts_on: today,
        ends_on: today + Duration::days(30),
    }
}

#[tokio::test]
async fn percentage_code_quotes_discount_off_subtotal() {
    let app = TestApp::new().await;
    let today = Utc::now().date_naive();
    app.seed_code(
        "SAVE10",
        "percentage",
        dec!(10),
        dec!(100),
        today,
        today + Duration::days(7),
        false,
    )
    .await;

    let quote = app
        .services()
        .discount_codes
        .validate("save10", Uuid::new_v4(), dec!(200.00))
        .await
        .expect("code should validate, case-insensitively");
    assert_eq!(quote.discount_amount, dec!(20.00));
    assert_eq!(quote.final_amount, dec!(180.00));
}

#[tokio::test]
async fn fixed_code_never_exceeds_subtotal() {
    let app = TestApp::new().await;
    let today = Utc::now().date_naive();
    app.seed_code(
        "FLAT50",
        "fixed",
        dec!(50),
        dec!(20),
        today,
        today + Duration::days(7),
        false,
    )
    .await;

    let quote = app
        .services()
        .discount_codes
        .validate("FLAT50", Uuid::new_v4(), dec!(25.00))
        .await
        .unwrap();
    assert_eq!(quote.discount_amount, dec!(25.00));
    assert_eq!(quote.final_amount, dec!(0.00));
}

#[tokio::test]
async fn minimum_order_shortfall_is_reported() {
    let app = TestApp::new().await;
    let today = Utc::now().date_naive();
    app.seed_code(
        "BIGSPEND",
        "percentage",
        dec!(15),
        dec!(500),
        today,
        today + Duration::days(7),
        false,
    )
    .await;

    let err = app
        .services()
        .discount_codes
        .validate("BIGSPEND", Uuid::new_v4(), dec!(499.00))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::MinimumNotMet { required, shortfall }
            if required == dec!(500) && shortfall == dec!(1.00)
    );
}

#[tokio::test]
async fn unknown_expired_and_out_of_window_codes_are_invalid() {
    let app = TestApp::new().await;
    let today = Utc::now().date_naive();
    let account = Uuid::new_v4();

    app.seed_code(
        "SWITCHEDOFF",
        "percentage",
        dec!(10),
        dec!(0.01),
        today,
        today + Duration::days(7),
        true,
    )
    .await;
    app.seed_code(
        "TOMORROW",
        "percentage",
        dec!(10),
        dec!(0.01),
        today + Duration::days(1),
        today + Duration::days(7),
        false,
    )
    .await;

    for code in ["NOSUCHCODE", "SWITCHEDOFF", "TOMORROW"] {
        let err = app
            .services()
            .discount_codes
            .validate(code, account, dec!(100.00))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidCode(_), "code {code}");
    }
}

#[tokio::test]
async fn codes_are_single_use_per_account() {
    let app = TestApp::new().await;
    let today = Utc::now().date_naive();
    let code_id = app
        .seed_code(
            "ONCE10",
            "percentage",
            dec!(10),
            dec!(0.01),
            today,
            today + Duration::days(7),
            false,
        )
        .await;
    let first_account = Uuid::new_v4();
    let second_account = Uuid::new_v4();

    app.services()
        .discount_codes
        .mark_used(code_id, first_account, None)
        .await
        .unwrap();

    let err = app
        .services()
        .discount_codes
        .validate("ONCE10", first_account, dec!(100.00))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    // Another account is unaffected.
    app.services()
        .discount_codes
        .validate("ONCE10", second_account, dec!(100.00))
        .await
        .expect("other accounts may still use the code");
}

#[tokio::test]
async fn code_format_is_enforced_on_creation() {
    let app = TestApp::new().await;

    for bad in ["ab", "toolongcode12345", "BAD CODE", "drop-it"] {
        let mut request = code_request(bad);
        request.code = bad.to_string();
        let err = app
            .services()
            .discount_codes
            .create_code(request)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_), "code {bad}");
    }

    let created = app
        .services()
        .discount_codes
        .create_code(code_request("summer24"))
        .await
        .unwrap();
    assert_eq!(created.code, "SUMMER24");
}

#[tokio::test]
async fn fixed_value_must_stay_below_minimum_order() {
    let app = TestApp::new().await;
    let mut request = code_request("FLAT200");
    request.discount_type = DiscountType::Fixed;
    request.value = dec!(200);
    request.min_order_amount = dec!(100);

    let err = app
        .services()
        .discount_codes
        .create_code(request)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn window_closed_codes_cannot_be_toggled() {
    let app = TestApp::new().await;
    let today = Utc::now().date_naive();
    let dead = app
        .seed_code(
            "LASTYEAR",
            "percentage",
            dec!(10),
            dec!(0.01),
            today - Duration::days(30),
            today - Duration::days(1),
            true,
        )
        .await;

    let err = app.services().discount_codes.toggle_code(dead).await.unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn duplicate_code_rejected() {
    let app = TestApp::new().await;
    app.services()
        .discount_codes
        .create_code(code_request("UNIQUE1"))
        .await
        .unwrap();
    let err = app
        .services()
        .discount_codes
        .create_code(code_request("unique1"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}
