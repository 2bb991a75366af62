//! SeaORM entities for the settlement engine's persisted state.

pub mod category;
pub mod discount_code;
pub mod discount_code_usage;
pub mod offer;
pub mod offer_item;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_variant;
pub mod wallet;
pub mod wallet_transaction;
