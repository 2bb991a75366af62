#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    entities::{discount_code, offer, offer_item},
    events,
    models::{OfferScope, OfferStatus},
    services::AppServices,
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

/// Test harness backed by a throwaway SQLite database file.
pub struct TestApp {
    pub state: AppState,
    db_file: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_file = format!("/tmp/storefront_test_{}.db", Uuid::new_v4().simple());
        let cfg = AppConfig {
            database_url: format!("sqlite://{db_file}?mode=rwc"),
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            log_level: "warn".to_string(),
            log_json: false,
            auto_migrate: true,
            sweep_interval_secs: 3600,
            sweep_reactivate_manual: false,
            wallet_currency: "INR".to_string(),
        };

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to create test schema");

        let db = Arc::new(pool);
        let (event_sender, event_rx) = events::channel(1024);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db.clone(), event_sender.clone(), &cfg);
        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            state,
            db_file,
            _event_task: event_task,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    pub fn router(&self) -> Router {
        storefront_api::handlers::app_router(self.state.clone())
    }

    /// Sends one request through the router and parses the JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                builder
                    .body(Body::from(json.to_string()))
                    .expect("failed to build request")
            }
            None => builder.body(Body::empty()).expect("failed to build request"),
        };

        let response = self
            .router()
            .oneshot(request)
            .await
            .expect("router call failed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn seed_category(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        storefront_api::entities::category::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            is_blocked: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed category");
        id
    }

    pub async fn seed_product(&self, category_id: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        storefront_api::entities::product::ActiveModel {
            id: Set(id),
            category_id: Set(category_id),
            name: Set(name.to_string()),
            is_blocked: Set(false),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product");
        id
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        sku: &str,
        base_price: Decimal,
        stock: i32,
    ) -> Uuid {
        let id = Uuid::new_v4();
        storefront_api::entities::product_variant::ActiveModel {
            id: Set(id),
            product_id: Set(product_id),
            sku: Set(sku.to_string()),
            base_price: Set(base_price),
            effective_price: Set(base_price),
            stock: Set(stock),
            is_blocked: Set(false),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed variant");
        id
    }

    /// Inserts an offer row directly, bypassing the service-side date checks.
    /// Sweep tests need offers whose windows started in the past.
    pub async fn seed_offer(
        &self,
        scope: OfferScope,
        discount_percent: i32,
        starts_on: NaiveDate,
        ends_on: NaiveDate,
        status: OfferStatus,
        items: &[Uuid],
    ) -> Uuid {
        let id = Uuid::new_v4();
        offer::ActiveModel {
            id: Set(id),
            name: Set(format!("seeded-{}", id.simple())),
            scope: Set(scope.to_string()),
            discount_percent: Set(discount_percent),
            starts_on: Set(starts_on),
            ends_on: Set(ends_on),
            status: Set(status.to_string()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed offer");

        for item in items {
            offer_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                offer_id: Set(id),
                item_id: Set(*item),
            }
            .insert(&*self.state.db)
            .await
            .expect("failed to seed offer item");
        }
        id
    }

    /// Inserts a discount code row directly, bypassing the admin-side checks.
    pub async fn seed_code(
        &self,
        code: &str,
        discount_type: &str,
        value: Decimal,
        min_order_amount: Decimal,
        starts_on: NaiveDate,
        ends_on: NaiveDate,
        is_expired: bool,
    ) -> Uuid {
        let id = Uuid::new_v4();
        discount_code::ActiveModel {
            id: Set(id),
            code: Set(code.to_string()),
            description: Set("seeded code for testing".to_string()),
            discount_type: Set(discount_type.to_string()),
            value: Set(value),
            min_order_amount: Set(min_order_amount),
            starts_on: Set(starts_on),
            ends_on: Set(ends_on),
            is_expired: Set(is_expired),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed discount code");
        id
    }

    /// Puts money into an account's wallet.
    pub async fn fund_wallet(&self, account_id: Uuid, amount: Decimal) {
        self.services()
            .ledger
            .credit(account_id, Uuid::new_v4(), amount, "test top-up", None)
            .await
            .expect("failed to fund wallet");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_file);
    }
}
