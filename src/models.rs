//! Domain enums and the pure state-machine rules they obey.
//!
//! Entities persist these as strings; services parse at the boundary so the
//! transition logic lives in one place instead of scattered string matches.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Order lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Legal forward transitions of the order state machine.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Shipped)
                | (Pending, Cancelled)
                | (Shipped, OutForDelivery)
                | (Shipped, Cancelled)
                | (OutForDelivery, Delivered)
        )
    }

    /// Cancellation is only legal pre-delivery, before the parcel is out.
    pub fn is_cancellable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Shipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Online,
    Wallet,
}

impl PaymentMethod {
    /// Methods whose completed payments are refunded to the wallet on cancel.
    pub fn is_refundable(self) -> bool {
        matches!(self, PaymentMethod::Online | PaymentMethod::Wallet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Per-line return sub-state. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReturnStatus {
    None,
    Requested,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OfferScope {
    Product,
    Category,
}

/// Offer activation state maintained by admin edits and the sweep pass.
///
/// `ManuallyOff` is distinct from `Expired` so the sweep can tell "admin
/// turned it off" apart from "window closed"; only an admin toggle (or the
/// opt-in reactivation config) brings a `ManuallyOff` offer back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OfferStatus {
    Scheduled,
    Active,
    ManuallyOff,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionKind {
    Credit,
    Debit,
}

impl TransactionKind {
    /// Sign applied when folding the ledger into a balance.
    pub fn sign(self) -> i64 {
        match self {
            TransactionKind::Credit => 1,
            TransactionKind::Debit => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn order_status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Shipped,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            let parsed = OrderStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(OrderStatus::OutForDelivery.to_string(), "out_for_delivery");
    }

    #[test]
    fn delivery_path_is_linear() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::OutForDelivery));
        assert!(OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn cancellation_is_pre_delivery_only() {
        assert!(OrderStatus::Pending.is_cancellable());
        assert!(OrderStatus::Shipped.is_cancellable());
        assert!(!OrderStatus::OutForDelivery.is_cancellable());
        assert!(!OrderStatus::Delivered.is_cancellable());
        assert!(!OrderStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn refundable_payment_methods() {
        assert!(PaymentMethod::Online.is_refundable());
        assert!(PaymentMethod::Wallet.is_refundable());
        assert!(!PaymentMethod::Cod.is_refundable());
    }

    #[test]
    fn ledger_fold_signs() {
        assert_eq!(TransactionKind::Credit.sign(), 1);
        assert_eq!(TransactionKind::Debit.sign(), -1);
    }
}
