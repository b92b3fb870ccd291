//! Caller-side client for the generation endpoints, including the polling
//! loop a storefront runs after submitting a job.

use crate::error::{AppError, AppResult};
use crate::models::{ApiResponse, CreateGenerationRequest, CreateGenerationResponse, GenerationStatusResponse};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The record reached `completed` or `failed`.
    Finished(GenerationStatusResponse),
    /// The deadline passed first. The job is still running server-side and
    /// nothing was failed or refunded; `None` if no poll ever succeeded.
    StillProcessing(Option<GenerationStatusResponse>),
}

#[derive(Clone)]
pub struct GenerationClient {
    http: Client,
    base_url: String,
    token: String,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent("genmeter-client")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn read_envelope<T: DeserializeOwned>(response: Response) -> AppResult<T> {
        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await?;
        if status.is_success()
            && envelope.success
            && let Some(data) = envelope.data
        {
            return Ok(data);
        }

        let message = envelope
            .error
            .map(|e| format!("{}: {}", e.code, e.message))
            .unwrap_or_else(|| format!("HTTP {status}"));
        Err(match status {
            StatusCode::BAD_REQUEST => AppError::ValidationError(message),
            StatusCode::UNAUTHORIZED => AppError::AuthError(message),
            StatusCode::NOT_FOUND => AppError::NotFound(message),
            _ => AppError::ExternalApiError(message),
        })
    }

    pub async fn submit(&self, request: &CreateGenerationRequest) -> AppResult<CreateGenerationResponse> {
        let response = self
            .http
            .post(format!("{}/api/v1/generation", self.base_url))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    pub async fn status(&self, record_id: Uuid) -> AppResult<GenerationStatusResponse> {
        let response = self
            .http
            .get(format!("{}/api/v1/generation/{record_id}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    /// Polls every `interval` until the record is terminal or `timeout` elapses.
    /// Transient errors are logged and polling continues.
    pub async fn wait_for_result(
        &self,
        record_id: Uuid,
        interval: Duration,
        timeout: Duration,
    ) -> AppResult<PollOutcome> {
        let deadline = Instant::now() + timeout;
        let mut last = None;

        loop {
            match self.status(record_id).await {
                Ok(snapshot) if snapshot.status.is_terminal() => {
                    return Ok(PollOutcome::Finished(snapshot));
                }
                Ok(snapshot) => last = Some(snapshot),
                Err(e @ (AppError::NotFound(_) | AppError::AuthError(_))) => return Err(e),
                Err(e) => log::warn!("Polling record {record_id} failed, will retry: {e}"),
            }

            if Instant::now() + interval > deadline {
                log::info!("Record {record_id} still processing after {timeout:?}");
                return Ok(PollOutcome::StillProcessing(last));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::GenerationStatus;
    use crate::test_utils::spawn_stub_server;
    use actix_web::{HttpResponse, web};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(id: &str, status: &str) -> serde_json::Value {
        json!({
            "success": true,
            "data": {
                "id": id,
                "status": status,
                "operation_type": "colorization",
                "credits_used": 2,
                "created_at": "2026-03-01T10:00:00Z"
            }
        })
    }

    #[actix_web::test]
    async fn test_timeout_surfaces_still_processing() {
        let base = spawn_stub_server(|cfg| {
            cfg.route(
                "/api/v1/generation/{id}",
                web::get().to(|path: web::Path<String>| async move {
                    HttpResponse::Ok().json(snapshot(&path, "processing"))
                }),
            );
        });

        let client = GenerationClient::new(base, "token").unwrap();
        let outcome = client
            .wait_for_result(
                Uuid::new_v4(),
                Duration::from_millis(20),
                Duration::from_millis(120),
            )
            .await
            .unwrap();
        match outcome {
            PollOutcome::StillProcessing(Some(last)) => {
                assert_eq!(last.status, GenerationStatus::Processing)
            }
            other => panic!("expected StillProcessing, got {other:?}"),
        }
    }

    #[actix_web::test]
    async fn test_transient_errors_are_retried_until_finished() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let base = spawn_stub_server(|cfg| {
            cfg.route(
                "/api/v1/generation/{id}",
                web::get().to(|path: web::Path<String>| async move {
                    match CALLS.fetch_add(1, Ordering::SeqCst) {
                        0 => HttpResponse::ServiceUnavailable().json(json!({
                            "success": false,
                            "error": {"code": "UPSTREAM_ERROR", "message": "busy"}
                        })),
                        1 => HttpResponse::Ok().json(snapshot(&path, "processing")),
                        _ => HttpResponse::Ok().json(snapshot(&path, "failed")),
                    }
                }),
            );
        });

        let client = GenerationClient::new(base, "token").unwrap();
        let outcome = client
            .wait_for_result(
                Uuid::new_v4(),
                Duration::from_millis(10),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Finished(ref s) if s.status == GenerationStatus::Failed
        ));
        assert_eq!(CALLS.load(Ordering::SeqCst), 3);
    }

    #[actix_web::test]
    async fn test_missing_record_stops_polling() {
        let base = spawn_stub_server(|cfg| {
            cfg.route(
                "/api/v1/generation/{id}",
                web::get().to(|| async {
                    HttpResponse::NotFound().json(json!({
                        "success": false,
                        "error": {"code": "NOT_FOUND", "message": "no such record"}
                    }))
                }),
            );
        });

        let client = GenerationClient::new(base, "token").unwrap();
        let err = client
            .wait_for_result(
                Uuid::new_v4(),
                Duration::from_millis(10),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
