//! Credit-metered generation orchestrator.
//!
//! Submit debits and records the job in one transaction, then dispatches it to
//! the provider. Poll advances a `processing` record from the provider's view
//! of the task, and settles a `pending` record whose dispatch failed or never
//! finished. Every terminal failure commits its refund and its transition
//! together, so a record is never `failed` without being refunded and never
//! refunded twice.

use crate::config::{OrchestratorConfig, PricingConfig};
use crate::entities::{GenerationStatus, TransactionType, generation_record_entity as records};
use crate::error::{AppError, AppResult};
use crate::external::{ComputeProvider, ProviderTaskState};
use crate::models::{
    CreateGenerationRequest, CreateGenerationResponse, GenerationPageResponse,
    GenerationStatusResponse, PageQuery, PaginatedResponse, PaginationParams,
};
use crate::services::generation_store::{
    self as store, ClaimCondition, NewGenerationRecord, StatusPatch,
};
use crate::services::ledger_service::{self as ledger, with_tail_retry};
use crate::services::materializer::Materializer;
use chrono::{Duration, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

const SWEEP_BATCH: u64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    /// Settled by the same path a poll takes.
    pub reconciled: usize,
    pub timed_out: usize,
    /// Left alone because a poller holds a live materialization claim.
    pub in_flight: usize,
}

#[derive(Clone)]
pub struct GenerationService {
    pool: DatabaseConnection,
    provider: Arc<dyn ComputeProvider>,
    materializer: Materializer,
    pricing: PricingConfig,
    settings: OrchestratorConfig,
}

fn validate_input_url(input_url: &str) -> AppResult<()> {
    let url = reqwest::Url::parse(input_url)
        .map_err(|_| AppError::ValidationError("input_url must be an absolute URL".into()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::ValidationError(
            "input_url must be an http(s) URL".into(),
        ));
    }
    Ok(())
}

impl GenerationService {
    pub fn new(
        pool: DatabaseConnection,
        provider: Arc<dyn ComputeProvider>,
        materializer: Materializer,
        pricing: PricingConfig,
        settings: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            provider,
            materializer,
            pricing,
            settings,
        }
    }

    pub async fn submit(
        &self,
        user_id: Uuid,
        request: CreateGenerationRequest,
    ) -> AppResult<CreateGenerationResponse> {
        validate_input_url(&request.input_url)?;
        request.params.validate()?;

        let operation = request.params.operation_type();
        let cost = self.pricing.cost_of(operation);

        // advisory; the debit below re-checks against the tail it appends to
        let balance = ledger::get_balance(&self.pool, user_id).await?;
        if balance < cost {
            return Err(AppError::InsufficientCredits {
                balance,
                required: cost,
            });
        }

        let record_id = Uuid::new_v4();
        let pool = &self.pool;
        let request_ref = &request;
        let record = with_tail_retry(self.settings.ledger_max_attempts, move || async move {
            let txn = pool.begin().await?;
            ledger::debit(
                &txn,
                user_id,
                cost,
                Some(record_id),
                Some(format!("{operation} generation")),
            )
            .await?;
            let record = store::create(
                &txn,
                NewGenerationRecord {
                    id: record_id,
                    user_id,
                    input_url: request_ref.input_url.clone(),
                    params: request_ref.params.clone(),
                    credit_consumed: cost,
                },
            )
            .await?;
            txn.commit().await?;
            Ok::<_, AppError>(record)
        })
        .await?;
        log::info!("User {user_id} submitted {operation} record {record_id} for {cost} credits");

        let job = request.params.to_provider_job(&request.input_url);
        let status = match self.provider.submit(&job).await {
            Ok(task_id) => self.mark_dispatched(record_id, &task_id).await,
            Err(e) => {
                log::warn!("Dispatch of record {record_id} failed: {e}");
                self.refund_rejected_dispatch(&record, e.to_string()).await
            }
        };

        Ok(CreateGenerationResponse { record_id, status })
    }

    /// Stores the provider task id with `pending -> processing`. If the write
    /// never lands the record stays `pending` and is settled once the dispatch
    /// timeout passes.
    async fn mark_dispatched(&self, record_id: Uuid, task_id: &str) -> GenerationStatus {
        let pool = &self.pool;
        let outcome = self
            .retry_write("Recording provider task", move || async move {
                store::update_status(
                    pool,
                    record_id,
                    GenerationStatus::Pending,
                    GenerationStatus::Processing,
                    StatusPatch {
                        provider_task_id: Some(task_id.to_string()),
                        ..Default::default()
                    },
                )
                .await
            })
            .await;

        match outcome {
            Ok(()) => GenerationStatus::Processing,
            Err(AppError::StaleTransition) => {
                log::warn!("Record {record_id} was settled before task {task_id} was recorded");
                match store::get(pool, record_id).await {
                    Ok(current) => current.status,
                    Err(_) => GenerationStatus::Pending,
                }
            }
            Err(e) => {
                log::error!(
                    "Record {record_id} dispatched as task {task_id} but not marked processing: {e}"
                );
                GenerationStatus::Pending
            }
        }
    }

    /// Refunds a dispatch the provider refused, retrying the refund until it
    /// commits. If it never does, the record is marked so the next poll settles it.
    async fn refund_rejected_dispatch(
        &self,
        record: &records::Model,
        message: String,
    ) -> GenerationStatus {
        let message_ref = &message;
        let outcome = self
            .retry_write("Refunding failed dispatch", move || {
                self.fail_and_refund(
                    record,
                    GenerationStatus::Pending,
                    message_ref.clone(),
                    ClaimCondition::Any,
                )
            })
            .await;

        match outcome {
            Ok(current) => current.status,
            Err(e) => {
                log::error!(
                    "Record {} dispatch failed and refund did not commit: {e}",
                    record.id
                );
                if let Err(mark_err) =
                    store::record_dispatch_failure(&self.pool, record.id, &message).await
                {
                    log::error!(
                        "Record {} left pending until the dispatch timeout: {mark_err}",
                        record.id
                    );
                }
                GenerationStatus::Pending
            }
        }
    }

    /// Retries a record write that has to land after a dispatch. Stale and
    /// illegal transitions are final.
    async fn retry_write<T, F, Fut>(&self, what: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let attempts = self.settings.write_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e)
                    if attempt < attempts
                        && !matches!(e, AppError::StaleTransition | AppError::InternalError(_)) =>
                {
                    log::warn!("{what} failed (attempt {attempt}/{attempts}), retrying: {e}");
                    let backoff = self.settings.write_retry_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Status read that also advances the record. Safe to call concurrently and repeatedly.
    pub async fn poll(&self, user_id: Uuid, record_id: Uuid) -> AppResult<GenerationStatusResponse> {
        let record = store::get_for_user(&self.pool, record_id, user_id).await?;
        Ok(self.reconcile(record).await?.into())
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        query: &PageQuery,
    ) -> AppResult<GenerationPageResponse> {
        let params = PaginationParams::from(query);
        let (items, total) = store::list_for_user(&self.pool, user_id, &params).await?;
        let items: Vec<GenerationStatusResponse> = items.into_iter().map(Into::into).collect();
        Ok(PaginatedResponse::new(items, &params, total))
    }

    async fn reconcile(&self, record: records::Model) -> AppResult<records::Model> {
        match record.status {
            GenerationStatus::Pending => return self.settle_undispatched(record).await,
            GenerationStatus::Processing => {}
            _ => return Ok(record),
        }
        let Some(task_id) = record.provider_task_id.clone() else {
            log::warn!("Processing record {} has no provider task id", record.id);
            return Ok(record);
        };

        let task = match self.provider.query(&task_id).await {
            Ok(task) => task,
            Err(AppError::ProviderUnavailable(msg)) => {
                log::warn!("Provider unavailable while polling record {}: {msg}", record.id);
                return Ok(record);
            }
            Err(e) => return Err(e),
        };

        match task.state {
            ProviderTaskState::Pending | ProviderTaskState::Running => Ok(record),
            ProviderTaskState::Failed => {
                let message = task
                    .message
                    .unwrap_or_else(|| "Provider reported failure".to_string());
                self.fail_and_refund(
                    &record,
                    GenerationStatus::Processing,
                    message,
                    ClaimCondition::Any,
                )
                .await
            }
            ProviderTaskState::Succeeded => match task.result_ref {
                Some(result_ref) => self.complete(record, &result_ref).await,
                None => {
                    self.fail_and_refund(
                        &record,
                        GenerationStatus::Processing,
                        "Provider returned no result".to_string(),
                        ClaimCondition::Any,
                    )
                    .await
                }
            },
        }
    }

    /// A `pending` record is failed only once its dispatch is known to have
    /// been refused or has been outstanding past the dispatch timeout.
    async fn settle_undispatched(&self, record: records::Model) -> AppResult<records::Model> {
        let overdue =
            record.created_at < Utc::now() - Duration::seconds(self.settings.dispatch_timeout_secs);
        let message = match (&record.error_message, overdue) {
            (Some(reason), _) => reason.clone(),
            (None, true) => "Dispatch to the provider did not complete".to_string(),
            (None, false) => return Ok(record),
        };
        self.fail_and_refund(&record, GenerationStatus::Pending, message, ClaimCondition::Any)
            .await
    }

    async fn complete(&self, record: records::Model, result_ref: &str) -> AppResult<records::Model> {
        let token = Uuid::new_v4();
        let lease = Duration::seconds(self.settings.materialize_lease_secs);
        if !store::claim(&self.pool, record.id, token, lease).await? {
            log::debug!("Record {} is being materialized elsewhere", record.id);
            return store::get(&self.pool, record.id).await;
        }

        match self
            .materializer
            .materialize(result_ref, record.user_id, record.id)
            .await
        {
            Ok(result) => {
                let patch = StatusPatch {
                    output_url: Some(result.url),
                    result_metadata: Some(result.metadata),
                    claim: ClaimCondition::Held(token),
                    ..Default::default()
                };
                match store::update_status(
                    &self.pool,
                    record.id,
                    GenerationStatus::Processing,
                    GenerationStatus::Completed,
                    patch,
                )
                .await
                {
                    Ok(()) | Err(AppError::StaleTransition) => {
                        store::get(&self.pool, record.id).await
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                log::warn!("Materialization of record {} failed: {e}", record.id);
                self.fail_and_refund(
                    &record,
                    GenerationStatus::Processing,
                    e.to_string(),
                    ClaimCondition::Held(token),
                )
                .await
            }
        }
    }

    /// `from -> failed` and the refund in one transaction. Losing the transition
    /// to another writer is not an error: the winner's state is returned.
    async fn fail_and_refund(
        &self,
        record: &records::Model,
        from: GenerationStatus,
        message: String,
        claim: ClaimCondition,
    ) -> AppResult<records::Model> {
        let pool = &self.pool;
        let message_ref = &message;
        let outcome = with_tail_retry(self.settings.ledger_max_attempts, move || async move {
            let txn = pool.begin().await?;
            store::update_status(
                &txn,
                record.id,
                from,
                GenerationStatus::Failed,
                StatusPatch {
                    error_message: Some(message_ref.clone()),
                    claim,
                    ..Default::default()
                },
            )
            .await?;
            let refund = ledger::credit(
                &txn,
                record.user_id,
                record.credit_consumed,
                Some(record.id),
                TransactionType::Refund,
                Some(format!("Refund for failed {}", record.operation_type)),
            )
            .await?;
            txn.commit().await?;
            Ok::<_, AppError>(refund)
        })
        .await;

        match outcome {
            Ok(refund) => {
                log::info!(
                    "Record {} failed ({message}); refunded {} credits to user {}",
                    record.id,
                    refund.amount,
                    record.user_id
                );
                store::get(&self.pool, record.id).await
            }
            Err(AppError::StaleTransition) => store::get(&self.pool, record.id).await,
            Err(e) => Err(e),
        }
    }

    /// Fails records stuck in `pending`/`processing` since before `older_than`
    /// ago, after giving the provider one last chance to report a result.
    pub async fn sweep_stale(&self, older_than: Duration) -> AppResult<SweepReport> {
        let cutoff = Utc::now() - older_than;
        let lease = Duration::seconds(self.settings.materialize_lease_secs);
        let mut report = SweepReport::default();

        for status in [GenerationStatus::Pending, GenerationStatus::Processing] {
            let stale = store::list_stale(&self.pool, status, cutoff, SWEEP_BATCH).await?;
            for record in stale {
                report.examined += 1;
                let id = record.id;
                let current = match self.reconcile(record).await {
                    Ok(current) => current,
                    Err(e) => {
                        log::error!("Sweep could not reconcile record {id}: {e}");
                        continue;
                    }
                };
                if current.status.is_terminal() {
                    report.reconciled += 1;
                    continue;
                }
                // a poller may have claimed the record after it was listed
                let from = current.status;
                match self
                    .fail_and_refund(
                        &current,
                        from,
                        "Timed out waiting for the provider".to_string(),
                        ClaimCondition::Unclaimed(lease),
                    )
                    .await
                {
                    Ok(done) if done.status == GenerationStatus::Failed => report.timed_out += 1,
                    Ok(done) if done.status.is_terminal() => report.reconciled += 1,
                    Ok(_) => {
                        log::debug!("Sweep left record {id} to the poller materializing it");
                        report.in_flight += 1;
                    }
                    Err(e) => log::error!("Sweep could not fail record {id}: {e}"),
                }
            }
        }

        if report.examined > 0 {
            log::info!(
                "Sweep examined {} stale records: {} reconciled, {} timed out, {} in flight",
                report.examined,
                report.reconciled,
                report.timed_out,
                report.in_flight
            );
        }
        Ok(report)
    }
}
