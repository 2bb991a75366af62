use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        product::Entity as ProductEntity,
        product_variant::Entity as VariantEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{OrderStatus, PaymentMethod, PaymentStatus, ReturnStatus},
    services::{
        discount_codes::DiscountCodeService, inventory::InventoryService, ledger::LedgerService,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Namespace for deterministic idempotency keys derived from order state, so
/// a retried cancel or return verification cannot double-refund.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x7b1f_42a6_9c3d_4e8f_a150_6d2b_8c4e_9a71);

fn refund_key(order_id: Uuid) -> Uuid {
    Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, format!("refund:{order_id}").as_bytes())
}

fn charge_key(order_id: Uuid) -> Uuid {
    Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, format!("charge:{order_id}").as_bytes())
}

fn return_refund_key(item_id: Uuid) -> Uuid {
    Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, format!("return:{item_id}").as_bytes())
}

/// Two checkouts that race to the same order number both pass the read but
/// the loser hits the unique index; retry gives it a fresh number.
const ORDER_NUMBER_ATTEMPTS: u32 = 3;

fn is_order_number_collision(err: &ServiceError) -> bool {
    use sea_orm::SqlErr;

    matches!(
        err,
        ServiceError::DatabaseError(db_err)
            if matches!(
                db_err.sql_err(),
                Some(SqlErr::UniqueConstraintViolation(detail)) if detail.contains("order_number")
            )
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLineRequest {
    pub variant_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub account_id: Uuid,
    #[validate(length(min = 1, message = "Order must contain at least one line"))]
    pub items: Vec<OrderLineRequest>,
    #[validate(length(min = 1, message = "Shipping address is required"))]
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    pub discount_code: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Owns the order state machine. Every transition runs in one database
/// transaction together with its stock and ledger effects, so a failure
/// anywhere rolls the whole step back — a partially reserved order can never
/// be observed.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    inventory: InventoryService,
    ledger: LedgerService,
    discount_codes: DiscountCodeService,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        inventory: InventoryService,
        ledger: LedgerService,
        discount_codes: DiscountCodeService,
    ) -> Self {
        Self {
            db,
            event_sender,
            inventory,
            ledger,
            discount_codes,
        }
    }

    /// Places an order: snapshots effective prices, reserves stock, applies
    /// an optional discount code and takes wallet payment, all atomically.
    #[instrument(skip(self, request), fields(account_id = %request.account_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        // A wallet debit folds the balance inside the transaction below. The
        // account lock must outlive the commit: released earlier, a second
        // checkout could fold a balance that cannot see this debit yet and
        // overdraw the wallet.
        let _wallet_guard = match request.payment_method {
            PaymentMethod::Wallet => Some(
                self.ledger
                    .account_lock(request.account_id)
                    .lock_owned()
                    .await,
            ),
            _ => None,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let txn = self.db.begin().await?;
            let result = self.create_order_in_txn(&txn, &request).await;
            match result {
                Ok((response, events)) => {
                    txn.commit().await?;
                    for event in events {
                        if let Err(e) = self.event_sender.send(event).await {
                            warn!(error = %e, "failed to send order event");
                        }
                    }
                    info!(
                        order_id = %response.order.id,
                        order_number = %response.order.order_number,
                        "order created"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    // Rolling back undoes every reservation made so far.
                    if let Err(e) = txn.rollback().await {
                        warn!(error = %e, "failed to roll back order creation transaction");
                    }
                    if attempt < ORDER_NUMBER_ATTEMPTS && is_order_number_collision(&err) {
                        warn!(attempt, "order number taken by a concurrent checkout, retrying");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn create_order_in_txn(
        &self,
        txn: &DatabaseTransaction,
        request: &CreateOrderRequest,
    ) -> Result<(OrderResponse, Vec<Event>), ServiceError> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let mut events = Vec::new();

        // Validate every line and capture unit prices before touching stock,
        // inside the same transaction so price and stock move together.
        let mut priced_lines = Vec::with_capacity(request.items.len());
        let mut subtotal = Decimal::ZERO;
        for line in &request.items {
            let variant = VariantEntity::find_by_id(line.variant_id)
                .one(txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Variant {} not found", line.variant_id))
                })?;
            if variant.is_blocked {
                return Err(ServiceError::ValidationError(format!(
                    "Variant {} is not available for sale",
                    variant.sku
                )));
            }
            let product = ProductEntity::find_by_id(variant.product_id)
                .one(txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", variant.product_id))
                })?;
            if product.is_blocked {
                return Err(ServiceError::ValidationError(format!(
                    "Product {} is not available for sale",
                    product.name
                )));
            }

            let unit_price = variant.effective_price;
            subtotal += unit_price * Decimal::from(line.quantity);
            priced_lines.push((variant, product, line.quantity, unit_price));
        }

        // Discount code: validated and consumed in the same transaction, so a
        // failed checkout never burns the code.
        let mut discount_amount = Decimal::ZERO;
        let mut discount_code_id = None;
        if let Some(code) = &request.discount_code {
            let quote = self
                .discount_codes
                .validate_with_conn(txn, code, request.account_id, subtotal)
                .await?;
            self.discount_codes
                .mark_used_with_conn(txn, quote.code_id, request.account_id, Some(order_id))
                .await?;
            discount_amount = quote.discount_amount;
            discount_code_id = Some(quote.code_id);
        }
        let total_amount = (subtotal - discount_amount).max(Decimal::ZERO);

        // Reserve stock line by line; any failure aborts the transaction and
        // releases everything reserved so far.
        for (variant, _, quantity, _) in &priced_lines {
            self.inventory.reserve(txn, variant.id, *quantity).await?;
            events.push(Event::StockReserved {
                variant_id: variant.id,
                quantity: *quantity,
                order_id,
            });
        }

        let order_number = self.next_order_number(txn).await?;

        let payment_status = match request.payment_method {
            PaymentMethod::Cod => PaymentStatus::Pending,
            // The gateway collaborator has already reported a successful
            // charge by the time checkout reaches us.
            PaymentMethod::Online => PaymentStatus::Completed,
            PaymentMethod::Wallet => {
                self.ledger
                    .debit_with_conn(
                        txn,
                        request.account_id,
                        charge_key(order_id),
                        total_amount,
                        &format!("Payment for order {order_number}"),
                        Some(order_id),
                    )
                    .await?;
                PaymentStatus::Completed
            }
        };

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            account_id: Set(request.account_id),
            status: Set(OrderStatus::Pending.to_string()),
            subtotal: Set(subtotal),
            discount_amount: Set(discount_amount),
            total_amount: Set(total_amount),
            payment_method: Set(request.payment_method.to_string()),
            payment_status: Set(payment_status.to_string()),
            discount_code_id: Set(discount_code_id),
            shipping_address: Set(request.shipping_address.clone()),
            notes: Set(request.notes.clone()),
            cancellation_reason: Set(None),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(txn)
        .await?;

        let mut items = Vec::with_capacity(priced_lines.len());
        for (variant, product, quantity, unit_price) in priced_lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                variant_id: Set(variant.id),
                quantity: Set(quantity),
                unit_price: Set(unit_price),
                return_status: Set(ReturnStatus::None.to_string()),
                return_reason: Set(None),
                return_requested_at: Set(None),
                return_processed_at: Set(None),
            }
            .insert(txn)
            .await?;
            items.push(item);
        }

        events.push(Event::OrderCreated(order_id));
        Ok((
            OrderResponse {
                order: order_model,
                items,
            },
            events,
        ))
    }

    /// Cancels an order. Legal pre-delivery only; releases every line's stock
    /// and refunds a completed online/wallet payment exactly once.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        requested_by: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let existing = self.load_order(&txn, order_id, requested_by).await?;
        let status = parse_order_status(&existing.status)?;
        if !status.is_cancellable() {
            return Err(ServiceError::InvalidTransition(format!(
                "Order {} cannot be cancelled from status {}",
                existing.order_number, status
            )));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        let mut events = Vec::new();
        for item in &items {
            self.inventory.release(&txn, item.variant_id, item.quantity).await?;
            events.push(Event::StockReleased {
                variant_id: item.variant_id,
                quantity: item.quantity,
                order_id,
            });
        }

        let method = parse_payment_method(&existing.payment_method)?;
        let paid = existing.payment_status == PaymentStatus::Completed.to_string();
        let mut payment_status = existing.payment_status.clone();
        if method.is_refundable() && paid {
            self.ledger
                .credit_with_conn(
                    &txn,
                    existing.account_id,
                    refund_key(order_id),
                    existing.total_amount,
                    &format!("Refund for cancelled order {}", existing.order_number),
                    Some(order_id),
                )
                .await?;
            payment_status = PaymentStatus::Refunded.to_string();
        }

        let version = existing.version;
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(OrderStatus::Cancelled.to_string());
        active.payment_status = Set(payment_status);
        active.cancellation_reason = Set(reason);
        active.cancelled_at = Set(Some(Utc::now()));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        events.push(Event::OrderCancelled(order_id));
        for event in events {
            if let Err(e) = self.event_sender.send(event).await {
                warn!(error = %e, "failed to send cancel event");
            }
        }
        info!(order_id = %order_id, "order cancelled");

        Ok(OrderResponse {
            order: updated,
            items,
        })
    }

    /// Admin fulfillment transition. Cancellation goes through
    /// [`cancel_order`](Self::cancel_order) so its stock and refund effects
    /// cannot be skipped.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderResponse, ServiceError> {
        if new_status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidTransition(
                "Use the cancel operation to cancel an order".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let existing = self.load_order(&txn, order_id, None).await?;
        let current = parse_order_status(&existing.status)?;
        if !current.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition(format!(
                "Order {} cannot move from {} to {}",
                existing.order_number, current, new_status
            )));
        }

        let method = parse_payment_method(&existing.payment_method)?;
        let mut payment_status = existing.payment_status.clone();
        // Cash on delivery is collected when the parcel arrives.
        if new_status == OrderStatus::Delivered && method == PaymentMethod::Cod {
            payment_status = PaymentStatus::Completed.to_string();
        }

        let old_status = existing.status.clone();
        let version = existing.version;
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(new_status.to_string());
        active.payment_status = Set(payment_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        txn.commit().await?;

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: new_status.to_string(),
            })
            .await
        {
            warn!(error = %e, "failed to send status change event");
        }

        Ok(OrderResponse {
            order: updated,
            items,
        })
    }

    /// Opens a return request on one line of a delivered order.
    #[instrument(skip(self, reason), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn submit_return(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        account_id: Uuid,
        reason: String,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;
        let existing = self.load_order(&txn, order_id, Some(account_id)).await?;
        let status = parse_order_status(&existing.status)?;
        if status != OrderStatus::Delivered {
            return Err(ServiceError::InvalidTransition(format!(
                "Returns can only be requested on delivered orders, order {} is {}",
                existing.order_number, status
            )));
        }

        let item = self.load_item(&txn, order_id, item_id).await?;
        let return_status = parse_return_status(&item.return_status)?;
        if return_status != ReturnStatus::None {
            return Err(ServiceError::Conflict(format!(
                "A return for this line already exists ({})",
                return_status
            )));
        }

        let mut active: order_item::ActiveModel = item.into();
        active.return_status = Set(ReturnStatus::Requested.to_string());
        active.return_reason = Set(Some(reason));
        active.return_requested_at = Set(Some(Utc::now()));
        active.update(&txn).await?;
        txn.commit().await?;

        if let Err(e) = self
            .event_sender
            .send(Event::ReturnRequested { order_id, item_id })
            .await
        {
            warn!(error = %e, "failed to send return requested event");
        }
        self.get_order(order_id, Some(account_id)).await
    }

    /// Admin decision on a requested return. Approval credits the line's
    /// purchase price exactly once; rejection moves no money. Both are
    /// terminal for the line.
    #[instrument(skip(self), fields(order_id = %order_id, item_id = %item_id, approve))]
    pub async fn verify_return(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        approve: bool,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;
        let existing = self.load_order(&txn, order_id, None).await?;

        let item = self.load_item(&txn, order_id, item_id).await?;
        let return_status = parse_return_status(&item.return_status)?;
        if return_status != ReturnStatus::Requested {
            return Err(ServiceError::InvalidTransition(format!(
                "Return verification requires a requested line, found {}",
                return_status
            )));
        }

        let mut refund_amount = None;
        if approve {
            let amount = item.unit_price * Decimal::from(item.quantity);
            self.ledger
                .credit_with_conn(
                    &txn,
                    existing.account_id,
                    return_refund_key(item_id),
                    amount,
                    &format!("Refund for returned item on order {}", existing.order_number),
                    Some(order_id),
                )
                .await?;
            refund_amount = Some(amount);
        }

        let decided = if approve {
            ReturnStatus::Approved
        } else {
            ReturnStatus::Rejected
        };
        let mut active: order_item::ActiveModel = item.into();
        active.return_status = Set(decided.to_string());
        active.return_processed_at = Set(Some(Utc::now()));
        active.update(&txn).await?;
        txn.commit().await?;

        let event = match refund_amount {
            Some(amount) => Event::ReturnApproved {
                order_id,
                item_id,
                refund_amount: amount,
            },
            None => Event::ReturnRejected { order_id, item_id },
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to send return decision event");
        }
        info!(order_id = %order_id, item_id = %item_id, approve, "return verified");
        self.get_order(order_id, None).await
    }

    pub async fn get_order(
        &self,
        order_id: Uuid,
        requested_by: Option<Uuid>,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.load_order(&*self.db, order_id, requested_by).await?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(OrderResponse { order, items })
    }

    pub async fn list_orders(
        &self,
        account_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::AccountId.eq(account_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    async fn load_order<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        requested_by: Option<Uuid>,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if let Some(account_id) = requested_by {
            if order.account_id != account_id {
                return Err(ServiceError::Forbidden(
                    "Order belongs to a different account".to_string(),
                ));
            }
        }
        Ok(order)
    }

    async fn load_item<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<order_item::Model, ServiceError> {
        let item = OrderItemEntity::find_by_id(item_id)
            .one(conn)
            .await?
            .filter(|i| i.order_id == order_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order item {} not found on order", item_id))
            })?;
        Ok(item)
    }

    /// `ORD-` plus a zero-padded sequence, continuing from the highest
    /// number taken so far. The unique index on `order_number` is the real
    /// arbiter; a concurrent checkout that computes the same number fails
    /// there and [`create_order`](Self::create_order) retries.
    async fn next_order_number(
        &self,
        txn: &DatabaseTransaction,
    ) -> Result<String, ServiceError> {
        let latest = OrderEntity::find()
            .order_by_desc(order::Column::OrderNumber)
            .one(txn)
            .await?;
        let next = latest
            .and_then(|o| {
                o.order_number
                    .strip_prefix("ORD-")
                    .and_then(|n| n.parse::<u64>().ok())
            })
            .map(|n| n + 1)
            .unwrap_or(1);
        Ok(format!("ORD-{:05}", next))
    }
}

fn parse_order_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("Unknown order status {}", raw)))
}

fn parse_payment_method(raw: &str) -> Result<PaymentMethod, ServiceError> {
    PaymentMethod::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("Unknown payment method {}", raw)))
}

fn parse_return_status(raw: &str) -> Result<ReturnStatus, ServiceError> {
    ReturnStatus::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("Unknown return status {}", raw)))
}
