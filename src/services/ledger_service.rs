//! Append-only credit ledger.
//!
//! The balance is never stored: it is the `balance_after` of the user's highest
//! `sequence` row. Appends are a compare-and-swap on that tail; the
//! `(user_id, sequence)` unique index rejects a concurrent writer that read the
//! same tail, and the caller retries on a fresh transaction via [`with_tail_retry`].
//!
//! The free functions take any `ConnectionTrait` so they compose with a record
//! update inside one datastore transaction.

use crate::entities::{TransactionStatus, TransactionType, credit_transaction_entity as ledger};
use crate::error::{AppError, AppResult};
use crate::models::{
    CreditTransactionPageResponse, CreditTransactionResponse, GrantCreditsRequest,
    GrantCreditsResponse, PageQuery, PaginatedResponse, PaginationParams,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use std::future::Future;
use uuid::Uuid;

/// One row to append. `amount` is signed.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub user_id: Uuid,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub related_entity_id: Option<Uuid>,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

pub fn consumption_key(record_id: Uuid) -> String {
    format!("consume:{record_id}")
}

pub fn refund_key(record_id: Uuid) -> String {
    format!("refund:{record_id}")
}

/// `(sequence, balance_after)` of the latest row, if any.
async fn tail<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<Option<(i64, i64)>> {
    let latest = ledger::Entity::find()
        .filter(ledger::Column::UserId.eq(user_id))
        .order_by_desc(ledger::Column::Sequence)
        .one(conn)
        .await?;
    Ok(latest.map(|row| (row.sequence, row.balance_after)))
}

pub async fn get_balance<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<i64> {
    Ok(tail(conn, user_id).await?.map(|(_, b)| b).unwrap_or(0))
}

/// Single append attempt. A lost race on the tail surfaces as a unique violation
/// (see [`is_unique_violation`]); a balance that would go negative is
/// `InsufficientCredits`.
pub async fn append<C: ConnectionTrait>(conn: &C, entry: LedgerEntry) -> AppResult<ledger::Model> {
    let seen = tail(conn, entry.user_id).await?;
    append_at_tail(conn, entry, seen).await
}

/// Appends directly after `seen`. Fails with a unique violation when another
/// row has taken that tail since it was read.
async fn append_at_tail<C: ConnectionTrait>(
    conn: &C,
    entry: LedgerEntry,
    seen: Option<(i64, i64)>,
) -> AppResult<ledger::Model> {
    let (sequence, balance) = seen.unwrap_or((0, 0));
    let balance_after = balance + entry.amount;
    if balance_after < 0 {
        return Err(AppError::InsufficientCredits {
            balance,
            required: -entry.amount,
        });
    }

    let row = ledger::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(entry.user_id),
        sequence: Set(sequence + 1),
        amount: Set(entry.amount),
        balance_after: Set(balance_after),
        transaction_type: Set(entry.transaction_type),
        related_entity_id: Set(entry.related_entity_id),
        status: Set(TransactionStatus::Completed),
        description: Set(entry.description),
        idempotency_key: Set(entry.idempotency_key),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    log::debug!(
        "Ledger append user={} seq={} type={} amount={} balance_after={}",
        row.user_id,
        row.sequence,
        row.transaction_type,
        row.amount,
        row.balance_after
    );
    Ok(row)
}

/// Appends a `consumption` row of `-amount`.
pub async fn debit<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    amount: i64,
    related_entity_id: Option<Uuid>,
    description: Option<String>,
) -> AppResult<ledger::Model> {
    if amount < 0 {
        return Err(AppError::ValidationError(
            "Debit amount must not be negative".into(),
        ));
    }
    append(
        conn,
        LedgerEntry {
            user_id,
            amount: -amount,
            transaction_type: TransactionType::Consumption,
            related_entity_id,
            description,
            idempotency_key: related_entity_id.map(consumption_key),
        },
    )
    .await
}

/// Appends a positive row. Refunds tied to a record carry its refund key, so a
/// second refund for the same record cannot be stored.
pub async fn credit<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    amount: i64,
    related_entity_id: Option<Uuid>,
    transaction_type: TransactionType,
    description: Option<String>,
) -> AppResult<ledger::Model> {
    if amount < 0 {
        return Err(AppError::ValidationError(
            "Credit amount must not be negative".into(),
        ));
    }
    if matches!(
        transaction_type,
        TransactionType::Consumption | TransactionType::Expiration
    ) {
        return Err(AppError::ValidationError(format!(
            "{transaction_type} is not a credit"
        )));
    }
    let idempotency_key = match (transaction_type, related_entity_id) {
        (TransactionType::Refund, Some(id)) => Some(refund_key(id)),
        _ => None,
    };
    append(
        conn,
        LedgerEntry {
            user_id,
            amount,
            transaction_type,
            related_entity_id,
            description,
            idempotency_key,
        },
    )
    .await
}

pub fn is_unique_violation(err: &AppError) -> bool {
    match err {
        AppError::DatabaseError(db_err) => matches!(
            db_err.sql_err(),
            Some(SqlErr::UniqueConstraintViolation(_))
        ),
        _ => false,
    }
}

/// Runs `op` until it stops losing the ledger tail, at most `max_attempts` times.
///
/// `op` must open and commit its own transaction so every attempt re-reads the tail.
pub async fn with_tail_retry<T, F, Fut>(max_attempts: u32, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if is_unique_violation(&e) => {
                if attempt >= max_attempts {
                    log::warn!("Ledger append lost the tail {attempt} times, giving up: {e}");
                    return Err(AppError::Conflict(
                        "Concurrent ledger update, please retry".into(),
                    ));
                }
                log::debug!("Ledger tail moved (attempt {attempt}), retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[derive(Clone)]
pub struct LedgerService {
    pool: DatabaseConnection,
    max_attempts: u32,
}

impl LedgerService {
    pub fn new(pool: DatabaseConnection, max_attempts: u32) -> Self {
        Self { pool, max_attempts }
    }

    pub async fn get_balance(&self, user_id: Uuid) -> AppResult<i64> {
        get_balance(&self.pool, user_id).await
    }

    /// Newest first.
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        query: &PageQuery,
    ) -> AppResult<CreditTransactionPageResponse> {
        let params = PaginationParams::from(query);
        let base_query = ledger::Entity::find().filter(ledger::Column::UserId.eq(user_id));

        let total = base_query.clone().count(&self.pool).await? as i64;
        let rows = base_query
            .order_by_desc(ledger::Column::Sequence)
            .limit(params.get_limit())
            .offset(params.get_offset())
            .all(&self.pool)
            .await?;

        let items: Vec<CreditTransactionResponse> = rows.into_iter().map(Into::into).collect();
        Ok(PaginatedResponse::new(items, &params, total))
    }

    /// Every movement referencing `entity_id`, oldest first.
    pub async fn transactions_for_entity(&self, entity_id: Uuid) -> AppResult<Vec<ledger::Model>> {
        Ok(ledger::Entity::find()
            .filter(ledger::Column::RelatedEntityId.eq(entity_id))
            .order_by_asc(ledger::Column::CreatedAt)
            .order_by_asc(ledger::Column::Sequence)
            .all(&self.pool)
            .await?)
    }

    /// Top-up from checkout or an operator.
    pub async fn grant(&self, request: GrantCreditsRequest) -> AppResult<GrantCreditsResponse> {
        if request.amount <= 0 {
            return Err(AppError::ValidationError(
                "Grant amount must be positive".into(),
            ));
        }
        if !matches!(
            request.transaction_type,
            TransactionType::Purchase | TransactionType::Bonus | TransactionType::Adjustment
        ) {
            return Err(AppError::ValidationError(
                "transaction_type must be purchase, bonus or adjustment".into(),
            ));
        }

        let pool = &self.pool;
        let request = &request;
        let row = with_tail_retry(self.max_attempts, move || async move {
            let txn = pool.begin().await?;
            let row = credit(
                &txn,
                request.user_id,
                request.amount,
                None,
                request.transaction_type,
                request.description.clone(),
            )
            .await?;
            txn.commit().await?;
            Ok::<_, AppError>(row)
        })
        .await?;

        log::info!(
            "Granted {} credits ({}) to user {}; balance {}",
            row.amount,
            row.transaction_type,
            row.user_id,
            row.balance_after
        );
        Ok(GrantCreditsResponse {
            balance: row.balance_after,
            transaction: row.into(),
        })
    }
}
