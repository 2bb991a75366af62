use crate::{
    db::DbPool,
    entities::{
        wallet::{self, Entity as WalletEntity},
        wallet_transaction::{self, Entity as TransactionEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::TransactionKind,
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Append-only per-account money ledger backing wallet balances.
///
/// The transaction id is the caller's idempotency key: replaying an id
/// returns the existing entry without appending, so a retried refund can
/// never double-credit. Per-account mutexes serialize the check-then-append
/// of `debit` so two concurrent debits cannot both pass the balance check;
/// a caller that debits inside its own transaction must hold
/// [`account_lock`](Self::account_lock) until that transaction commits, or
/// the fold runs against a balance that cannot see the other debit yet.
#[derive(Clone)]
pub struct LedgerService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    currency: String,
    account_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LedgerService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, currency: String) -> Self {
        Self {
            db,
            event_sender,
            currency,
            account_locks: Arc::new(DashMap::new()),
        }
    }

    /// The mutex serializing this account's check-then-append. Callers using
    /// the `_with_conn` variants inside their own transaction must hold it
    /// from before the first ledger call until their commit.
    pub fn account_lock(&self, account_id: Uuid) -> Arc<Mutex<()>> {
        self.account_locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Credits the account's wallet. Idempotent under `transaction_id`.
    #[instrument(skip(self, description))]
    pub async fn credit(
        &self,
        account_id: Uuid,
        transaction_id: Uuid,
        amount: Decimal,
        description: &str,
        order_id: Option<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;
        self.credit_with_conn(&*self.db, account_id, transaction_id, amount, description, order_id)
            .await
    }

    /// Transaction-aware variant of [`credit`](Self::credit) for callers that
    /// need the ledger entry to commit or roll back with their own writes.
    /// Does not take the account lock; see [`account_lock`](Self::account_lock).
    pub async fn credit_with_conn<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: Uuid,
        transaction_id: Uuid,
        amount: Decimal,
        description: &str,
        order_id: Option<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        self.append(
            conn,
            account_id,
            transaction_id,
            TransactionKind::Credit,
            amount,
            description,
            order_id,
        )
        .await
    }

    /// Debits the account's wallet. Fails atomically with
    /// [`ServiceError::InsufficientFunds`] when `amount` exceeds the balance;
    /// no transaction is appended in that case.
    #[instrument(skip(self, description))]
    pub async fn debit(
        &self,
        account_id: Uuid,
        transaction_id: Uuid,
        amount: Decimal,
        description: &str,
        order_id: Option<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;
        self.debit_with_conn(&*self.db, account_id, transaction_id, amount, description, order_id)
            .await
    }

    /// Transaction-aware variant of [`debit`](Self::debit). The caller must
    /// hold [`account_lock`](Self::account_lock) until its transaction
    /// commits; the balance fold cannot see another transaction's
    /// uncommitted debit.
    pub async fn debit_with_conn<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: Uuid,
        transaction_id: Uuid,
        amount: Decimal,
        description: &str,
        order_id: Option<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        self.append(
            conn,
            account_id,
            transaction_id,
            TransactionKind::Debit,
            amount,
            description,
            order_id,
        )
        .await
    }

    /// Derived balance: the signed fold over the wallet's transactions.
    pub async fn balance(&self, account_id: Uuid) -> Result<Decimal, ServiceError> {
        self.balance_with_conn(&*self.db, account_id).await
    }

    pub async fn balance_with_conn<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let wallet = WalletEntity::find()
            .filter(wallet::Column::AccountId.eq(account_id))
            .one(conn)
            .await?;
        let Some(wallet) = wallet else {
            return Ok(Decimal::ZERO);
        };
        self.fold_balance(conn, wallet.id).await
    }

    /// Transactions for an account, newest first.
    pub async fn transactions(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<wallet_transaction::Model>, ServiceError> {
        use sea_orm::QueryOrder;

        let wallet = WalletEntity::find()
            .filter(wallet::Column::AccountId.eq(account_id))
            .one(&*self.db)
            .await?;
        let Some(wallet) = wallet else {
            return Ok(Vec::new());
        };
        Ok(TransactionEntity::find()
            .filter(wallet_transaction::Column::WalletId.eq(wallet.id))
            .order_by_desc(wallet_transaction::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn fold_balance<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let rows = TransactionEntity::find()
            .filter(wallet_transaction::Column::WalletId.eq(wallet_id))
            .all(conn)
            .await?;

        let mut balance = Decimal::ZERO;
        for row in rows {
            let kind = TransactionKind::from_str(&row.kind).map_err(|_| {
                ServiceError::InternalError(format!(
                    "Transaction {} has unknown kind {}",
                    row.id, row.kind
                ))
            })?;
            balance += row.amount * Decimal::from(kind.sign());
        }
        Ok(balance)
    }

    async fn get_or_create_wallet<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: Uuid,
    ) -> Result<wallet::Model, ServiceError> {
        if let Some(existing) = WalletEntity::find()
            .filter(wallet::Column::AccountId.eq(account_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }

        let created = wallet::ActiveModel {
            id: Set(Uuid::new_v4()),
            account_id: Set(account_id),
            currency: Set(self.currency.clone()),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;
        info!(account_id = %account_id, wallet_id = %created.id, "wallet created");
        Ok(created)
    }

    #[allow(clippy::too_many_arguments)]
    async fn append<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: Uuid,
        transaction_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        description: &str,
        order_id: Option<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Transaction amount must be positive".to_string(),
            ));
        }

        let wallet = self.get_or_create_wallet(conn, account_id).await?;

        // Idempotent replay: the id already exists, nothing to append.
        if let Some(existing) = TransactionEntity::find_by_id(transaction_id).one(conn).await? {
            if existing.wallet_id == wallet.id
                && existing.kind == kind.to_string()
                && existing.amount == amount
            {
                warn!(transaction_id = %transaction_id, "replayed ledger transaction, skipping append");
                return Ok(existing.id);
            }
            return Err(ServiceError::Conflict(format!(
                "Transaction id {} already used with different parameters",
                transaction_id
            )));
        }

        if kind == TransactionKind::Debit {
            let balance = self.fold_balance(conn, wallet.id).await?;
            if amount > balance {
                return Err(ServiceError::InsufficientFunds {
                    balance,
                    requested: amount,
                });
            }
        }

        let entry = wallet_transaction::ActiveModel {
            id: Set(transaction_id),
            wallet_id: Set(wallet.id),
            kind: Set(kind.to_string()),
            amount: Set(amount),
            description: Set(description.to_string()),
            order_id: Set(order_id),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        info!(
            transaction_id = %entry.id,
            account_id = %account_id,
            kind = %kind,
            %amount,
            "ledger entry appended"
        );

        let event = match kind {
            TransactionKind::Credit => Event::WalletCredited {
                account_id,
                amount,
                transaction_id: entry.id,
            },
            TransactionKind::Debit => Event::WalletDebited {
                account_id,
                amount,
                transaction_id: entry.id,
            },
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to send wallet event");
        }

        Ok(entry.id)
    }
}
