//! Persistence for generation records.
//!
//! Status changes go through [`update_status`], a single conditional
//! `UPDATE ... WHERE id = ? AND status = ?`. Losing that race is
//! `AppError::StaleTransition`; callers re-read instead of writing again.

use crate::entities::{GenerationStatus, generation_record_entity as records};
use crate::error::{AppError, AppResult};
use crate::models::{GenerationParams, PaginationParams};
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewGenerationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub input_url: String,
    pub params: GenerationParams,
    pub credit_consumed: i64,
}

/// How a status transition relates to the materialization lease.
#[derive(Debug, Clone, Copy, Default)]
pub enum ClaimCondition {
    #[default]
    Any,
    /// The record must hold exactly this claim.
    Held(Uuid),
    /// The record must not hold a claim younger than this lease.
    Unclaimed(Duration),
}

/// Columns written together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub provider_task_id: Option<String>,
    pub output_url: Option<String>,
    pub error_message: Option<String>,
    pub result_metadata: Option<serde_json::Value>,
    pub claim: ClaimCondition,
}

pub async fn create<C: ConnectionTrait>(
    conn: &C,
    new: NewGenerationRecord,
) -> AppResult<records::Model> {
    let now = Utc::now();
    let parameters = serde_json::to_value(&new.params)?;
    let record = records::ActiveModel {
        id: Set(new.id),
        user_id: Set(new.user_id),
        operation_type: Set(new.params.operation_type()),
        status: Set(GenerationStatus::Pending),
        input_url: Set(new.input_url),
        output_url: Set(None),
        credit_consumed: Set(new.credit_consumed),
        provider_task_id: Set(None),
        error_message: Set(None),
        parameters: Set(parameters),
        result_metadata: Set(None),
        claim_token: Set(None),
        claimed_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        completed_at: Set(None),
    }
    .insert(conn)
    .await?;
    Ok(record)
}

pub async fn get<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<records::Model> {
    records::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Generation record {id} not found")))
}

/// Records of other users are reported as missing.
pub async fn get_for_user<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    user_id: Uuid,
) -> AppResult<records::Model> {
    records::Entity::find_by_id(id)
        .filter(records::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Generation record {id} not found")))
}

pub async fn update_status<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    expected: GenerationStatus,
    next: GenerationStatus,
    patch: StatusPatch,
) -> AppResult<()> {
    if !expected.can_transition_to(next) {
        return Err(AppError::InternalError(format!(
            "Illegal transition {expected} -> {next} for record {id}"
        )));
    }

    let now = Utc::now();
    let mut update = records::Entity::update_many()
        .col_expr(records::Column::Status, Expr::value(next))
        .col_expr(records::Column::UpdatedAt, Expr::value(now));

    if let Some(task_id) = patch.provider_task_id {
        update = update.col_expr(records::Column::ProviderTaskId, Expr::value(task_id));
    }
    if let Some(url) = patch.output_url {
        update = update.col_expr(records::Column::OutputUrl, Expr::value(url));
    }
    if let Some(message) = patch.error_message {
        update = update.col_expr(records::Column::ErrorMessage, Expr::value(message));
    }
    if let Some(metadata) = patch.result_metadata {
        update = update.col_expr(records::Column::ResultMetadata, Expr::value(metadata));
    }
    if next.is_terminal() {
        update = update
            .col_expr(records::Column::CompletedAt, Expr::value(now))
            .col_expr(records::Column::ClaimToken, Expr::value(Option::<Uuid>::None))
            .col_expr(
                records::Column::ClaimedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            );
    }

    let mut condition = Condition::all()
        .add(records::Column::Id.eq(id))
        .add(records::Column::Status.eq(expected));
    match patch.claim {
        ClaimCondition::Any => {}
        ClaimCondition::Held(token) => {
            condition = condition.add(records::Column::ClaimToken.eq(token));
        }
        ClaimCondition::Unclaimed(lease) => {
            condition = condition.add(
                Condition::any()
                    .add(records::Column::ClaimToken.is_null())
                    .add(records::Column::ClaimedAt.lt(now - lease)),
            );
        }
    }

    let result = update.filter(condition).exec(conn).await?;
    if result.rows_affected == 0 {
        log::debug!("Stale transition {expected} -> {next} for record {id}");
        return Err(AppError::StaleTransition);
    }
    log::info!("Generation record {id}: {expected} -> {next}");
    Ok(())
}

/// Marks a `pending` record whose dispatch was refused but whose refund did not
/// commit, so the next poll settles it without waiting for the dispatch timeout.
pub async fn record_dispatch_failure<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    message: &str,
) -> AppResult<()> {
    records::Entity::update_many()
        .col_expr(records::Column::ErrorMessage, Expr::value(message))
        .col_expr(records::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(records::Column::Id.eq(id))
        .filter(records::Column::Status.eq(GenerationStatus::Pending))
        .exec(conn)
        .await?;
    Ok(())
}

/// Takes the materialization lease on a `processing` record. Returns false when
/// another poller holds an unexpired claim or the record already moved on.
pub async fn claim<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    token: Uuid,
    lease: Duration,
) -> AppResult<bool> {
    let now = Utc::now();
    let expired_before = now - lease;
    let result = records::Entity::update_many()
        .col_expr(records::Column::ClaimToken, Expr::value(token))
        .col_expr(records::Column::ClaimedAt, Expr::value(now))
        .col_expr(records::Column::UpdatedAt, Expr::value(now))
        .filter(records::Column::Id.eq(id))
        .filter(records::Column::Status.eq(GenerationStatus::Processing))
        .filter(
            Condition::any()
                .add(records::Column::ClaimToken.is_null())
                .add(records::Column::ClaimedAt.lt(expired_before)),
        )
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Newest first.
pub async fn list_for_user<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    params: &PaginationParams,
) -> AppResult<(Vec<records::Model>, i64)> {
    let base_query = records::Entity::find().filter(records::Column::UserId.eq(user_id));
    let total = base_query.clone().count(conn).await? as i64;
    let items = base_query
        .order_by_desc(records::Column::CreatedAt)
        .limit(params.get_limit())
        .offset(params.get_offset())
        .all(conn)
        .await?;
    Ok((items, total))
}

/// Records in `status` not touched since `older_than`, oldest first.
pub async fn list_stale<C: ConnectionTrait>(
    conn: &C,
    status: GenerationStatus,
    older_than: DateTime<Utc>,
    limit: u64,
) -> AppResult<Vec<records::Model>> {
    Ok(records::Entity::find()
        .filter(records::Column::Status.eq(status))
        .filter(records::Column::UpdatedAt.lt(older_than))
        .order_by_asc(records::Column::UpdatedAt)
        .limit(limit)
        .all(conn)
        .await?)
}
