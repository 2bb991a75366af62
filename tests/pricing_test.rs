mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_api::errors::ServiceError;
use storefront_api::models::{OfferScope, OfferStatus};
use storefront_api::services::promotions::OfferRequest;

fn offer(name: &str, scope: OfferScope, percent: i32, items: Vec<uuid::Uuid>) -> OfferRequest {
    let today = Utc::now().date_naive();
    OfferRequest {
        name: name.to_string(),
        scope,
        discount_percent: percent,
        starts_on: today,
        ends_on: today + Duration::days(30),
        items,
    }
}

#[tokio::test]
async fn best_discount_wins_across_scopes() {
    let app = TestApp::new().await;
    let category = app.seed_category("electronics").await;
    let product = app.seed_product(category, "headphones").await;
    let variant = app.seed_variant(product, "HP-001", dec!(100.00), 10).await;

    app.services()
        .promotions
        .create_offer(offer("cat sale", OfferScope::Category, 20, vec![category]))
        .await
        .expect("category offer");
    let deeper = app
        .services()
        .promotions
        .create_offer(offer("prod sale", OfferScope::Product, 35, vec![product]))
        .await
        .expect("product offer");

    // Offers never stack; the deepest single discount applies.
    let price = app.services().promotions.resolve_price(variant).await.unwrap();
    assert_eq!(price, dec!(65.00));

    // With the deeper offer off, the runner-up takes over.
    app.services()
        .promotions
        .set_offer_active(deeper.offer.id, false)
        .await
        .unwrap();
    let price = app.services().promotions.resolve_price(variant).await.unwrap();
    assert_eq!(price, dec!(80.00));
}

#[tokio::test]
async fn discounted_price_rounds_to_cents() {
    let app = TestApp::new().await;
    let category = app.seed_category("books").await;
    let product = app.seed_product(category, "novel").await;
    let variant = app.seed_variant(product, "BK-001", dec!(99.99), 5).await;

    app.services()
        .promotions
        .create_offer(offer("ten off", OfferScope::Product, 10, vec![product]))
        .await
        .unwrap();

    let price = app.services().promotions.resolve_price(variant).await.unwrap();
    assert_eq!(price, dec!(89.99));
}

#[tokio::test]
async fn deactivation_restores_base_price_and_reactivation_reapplies() {
    let app = TestApp::new().await;
    let category = app.seed_category("toys").await;
    let product = app.seed_product(category, "blocks").await;
    let variant = app.seed_variant(product, "TY-001", dec!(40.00), 5).await;

    let created = app
        .services()
        .promotions
        .create_offer(offer("toy sale", OfferScope::Product, 25, vec![product]))
        .await
        .unwrap();
    assert_eq!(
        app.services().promotions.resolve_price(variant).await.unwrap(),
        dec!(30.00)
    );

    let off = app
        .services()
        .promotions
        .set_offer_active(created.offer.id, false)
        .await
        .unwrap();
    assert_eq!(off.status, OfferStatus::ManuallyOff.to_string());
    assert_eq!(
        app.services().promotions.resolve_price(variant).await.unwrap(),
        dec!(40.00)
    );

    app.services()
        .promotions
        .set_offer_active(created.offer.id, true)
        .await
        .unwrap();
    assert_eq!(
        app.services().promotions.resolve_price(variant).await.unwrap(),
        dec!(30.00)
    );
}

#[tokio::test]
async fn overlapping_offer_on_same_items_is_rejected() {
    let app = TestApp::new().await;
    let category = app.seed_category("garden").await;
    let product = app.seed_product(category, "hose").await;
    app.seed_variant(product, "GR-001", dec!(15.00), 5).await;

    app.services()
        .promotions
        .create_offer(offer("first", OfferScope::Product, 10, vec![product]))
        .await
        .unwrap();
    let err = app
        .services()
        .promotions
        .create_offer(offer("second", OfferScope::Product, 15, vec![product]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn activating_an_offer_outside_its_window_fails() {
    let app = TestApp::new().await;
    let category = app.seed_category("winter").await;
    let product = app.seed_product(category, "gloves").await;
    app.seed_variant(product, "WN-001", dec!(25.00), 5).await;

    let today = Utc::now().date_naive();
    let future = app
        .seed_offer(
            OfferScope::Product,
            30,
            today + chrono::Duration::days(10),
            today + chrono::Duration::days(20),
            OfferStatus::Scheduled,
            &[product],
        )
        .await;

    let err = app
        .services()
        .promotions
        .set_offer_active(future, true)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_) | ServiceError::ValidationError(_));
}

#[tokio::test]
async fn offer_update_recomputes_old_and_new_items() {
    let app = TestApp::new().await;
    let category = app.seed_category("kitchen").await;
    let pan = app.seed_product(category, "pan").await;
    let pot = app.seed_product(category, "pot").await;
    let pan_variant = app.seed_variant(pan, "KT-PAN", dec!(50.00), 5).await;
    let pot_variant = app.seed_variant(pot, "KT-POT", dec!(80.00), 5).await;

    let created = app
        .services()
        .promotions
        .create_offer(offer("pan sale", OfferScope::Product, 20, vec![pan]))
        .await
        .unwrap();
    assert_eq!(
        app.services().promotions.resolve_price(pan_variant).await.unwrap(),
        dec!(40.00)
    );

    // Move the offer from the pan to the pot.
    app.services()
        .promotions
        .update_offer(
            created.offer.id,
            offer("pot sale", OfferScope::Product, 20, vec![pot]),
        )
        .await
        .unwrap();

    assert_eq!(
        app.services().promotions.resolve_price(pan_variant).await.unwrap(),
        dec!(50.00)
    );
    assert_eq!(
        app.services().promotions.resolve_price(pot_variant).await.unwrap(),
        dec!(64.00)
    );
}
