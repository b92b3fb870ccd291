//! Client for the asynchronous image-synthesis provider.
//!
//! Every call is one network round trip; retry policy lives in the orchestrator.

use crate::config::ProviderConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job as sent to the provider, built from a `GenerationParams` variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderJob {
    pub function: &'static str,
    pub base_image_url: String,
    pub prompt: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderTaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTaskStatus {
    pub state: ProviderTaskState,
    /// URL of the provider-hosted artifact once the task succeeded.
    pub result_ref: Option<String>,
    pub message: Option<String>,
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Fails with `ProviderRejected` (bad input) or `ProviderUnavailable` (network, 5xx).
    async fn submit(&self, job: &ProviderJob) -> AppResult<String>;

    /// Fails only with `ProviderUnavailable`; that never means the job failed.
    async fn query(&self, task_id: &str) -> AppResult<ProviderTaskStatus>;
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    model: &'a str,
    input: SubmitInput<'a>,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SubmitInput<'a> {
    function: &'a str,
    prompt: &'a str,
    base_image_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    output: Option<TaskOutput>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    results: Option<Vec<TaskResult>>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    url: Option<String>,
}

fn describe(code: Option<String>, message: Option<String>) -> Option<String> {
    match (code, message) {
        (Some(c), Some(m)) => Some(format!("{c}: {m}")),
        (None, Some(m)) => Some(m),
        (Some(c), None) => Some(c),
        (None, None) => None,
    }
}

fn parse_task_status(output: TaskOutput) -> AppResult<ProviderTaskStatus> {
    let raw = output.task_status.unwrap_or_default();
    let message = describe(output.code, output.message);
    let status = match raw.as_str() {
        "PENDING" => ProviderTaskStatus {
            state: ProviderTaskState::Pending,
            result_ref: None,
            message,
        },
        "RUNNING" => ProviderTaskStatus {
            state: ProviderTaskState::Running,
            result_ref: None,
            message,
        },
        "SUCCEEDED" => {
            let result_ref = output
                .results
                .unwrap_or_default()
                .into_iter()
                .find_map(|r| r.url);
            match result_ref {
                Some(url) => ProviderTaskStatus {
                    state: ProviderTaskState::Succeeded,
                    result_ref: Some(url),
                    message,
                },
                // nothing to deliver
                None => ProviderTaskStatus {
                    state: ProviderTaskState::Failed,
                    result_ref: None,
                    message: Some(
                        message.unwrap_or_else(|| "Provider returned no result".to_string()),
                    ),
                },
            }
        }
        "FAILED" | "CANCELED" => ProviderTaskStatus {
            state: ProviderTaskState::Failed,
            result_ref: None,
            message: Some(message.unwrap_or_else(|| format!("Task {}", raw.to_lowercase()))),
        },
        "UNKNOWN" => ProviderTaskStatus {
            state: ProviderTaskState::Failed,
            result_ref: None,
            message: Some(message.unwrap_or_else(|| "Task unknown or expired".to_string())),
        },
        other => {
            return Err(AppError::ProviderUnavailable(format!(
                "Unrecognized task status '{other}'"
            )));
        }
    };
    Ok(status)
}

/// reqwest implementation against a DashScope-style async task API.
#[derive(Clone)]
pub struct DashScopeProvider {
    http: Client,
    config: ProviderConfig,
}

impl DashScopeProvider {
    pub fn new(config: ProviderConfig) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent("genmeter-backend/provider")
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::ConfigError(format!("provider http client: {e}")))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ComputeProvider for DashScopeProvider {
    async fn submit(&self, job: &ProviderJob) -> AppResult<String> {
        let body = SubmitBody {
            model: &self.config.model,
            input: SubmitInput {
                function: job.function,
                prompt: &job.prompt,
                base_image_url: &job.base_image_url,
            },
            parameters: &job.parameters,
        };

        let response = self
            .http
            .post(self.url(&self.config.submit_path))
            .bearer_auth(&self.config.api_key)
            .header("X-DashScope-Async", "enable")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("submit: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("submit body: {e}")))?;
        let envelope: Option<TaskEnvelope> = serde_json::from_str(&text).ok();

        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            let detail = envelope
                .and_then(|e| describe(e.code, e.message))
                .unwrap_or(text);
            return Err(AppError::ProviderRejected(format!("HTTP {status}: {detail}")));
        }
        if !status.is_success() {
            return Err(AppError::ProviderUnavailable(format!("HTTP {status}: {text}")));
        }

        let task_id = envelope
            .and_then(|e| e.output)
            .and_then(|o| o.task_id)
            .ok_or_else(|| AppError::ProviderUnavailable("submit response without task_id".into()))?;

        log::info!("Provider accepted {} job as task {task_id}", job.function);
        Ok(task_id)
    }

    async fn query(&self, task_id: &str) -> AppResult<ProviderTaskStatus> {
        let response = self
            .http
            .get(self.url(&format!("/tasks/{task_id}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("query {task_id}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderUnavailable(format!(
                "query {task_id}: HTTP {status}: {text}"
            )));
        }

        let envelope: TaskEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("query {task_id}: {e}")))?;
        let output = envelope.output.ok_or_else(|| {
            AppError::ProviderUnavailable(format!("query {task_id}: response without output"))
        })?;
        parse_task_status(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::spawn_stub_server;
    use actix_web::{HttpRequest, HttpResponse, web};
    use serde_json::json;

    fn provider_for(base_url: String) -> DashScopeProvider {
        DashScopeProvider::new(ProviderConfig {
            base_url,
            api_key: "pk-test".into(),
            model: "wanx2.1-imageedit".into(),
            submit_path: "/services/aigc/image2image/image-synthesis".into(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    fn job() -> ProviderJob {
        ProviderJob {
            function: "colorization",
            base_image_url: "https://img.example.com/in.png".into(),
            prompt: "Colorize".into(),
            parameters: json!({}),
        }
    }

    fn output(value: serde_json::Value) -> TaskOutput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let s = parse_task_status(output(json!({"task_status": "RUNNING"}))).unwrap();
        assert_eq!(s.state, ProviderTaskState::Running);

        let s = parse_task_status(output(json!({
            "task_status": "SUCCEEDED",
            "results": [{"url": "https://cdn.provider/x.png"}]
        })))
        .unwrap();
        assert_eq!(s.state, ProviderTaskState::Succeeded);
        assert_eq!(s.result_ref.as_deref(), Some("https://cdn.provider/x.png"));

        let s = parse_task_status(output(json!({
            "task_status": "FAILED", "code": "DataInspectionFailed", "message": "unsafe input"
        })))
        .unwrap();
        assert_eq!(s.state, ProviderTaskState::Failed);
        assert_eq!(s.message.as_deref(), Some("DataInspectionFailed: unsafe input"));

        let s = parse_task_status(output(json!({"task_status": "CANCELED"}))).unwrap();
        assert_eq!(s.state, ProviderTaskState::Failed);
        let s = parse_task_status(output(json!({"task_status": "UNKNOWN"}))).unwrap();
        assert_eq!(s.state, ProviderTaskState::Failed);
    }

    #[test]
    fn test_succeeded_without_result_is_failure() {
        let s = parse_task_status(output(json!({"task_status": "SUCCEEDED", "results": []})))
            .unwrap();
        assert_eq!(s.state, ProviderTaskState::Failed);
    }

    #[test]
    fn test_unrecognized_status_is_transient() {
        let err = parse_task_status(output(json!({"task_status": "WEIRD"}))).unwrap_err();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));
    }

    #[actix_web::test]
    async fn test_submit_sends_async_header_and_returns_task_id() {
        let base = spawn_stub_server(|cfg| {
            cfg.route(
                "/services/aigc/image2image/image-synthesis",
                web::post().to(|req: HttpRequest, body: web::Json<serde_json::Value>| async move {
                    let async_header = req
                        .headers()
                        .get("X-DashScope-Async")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if async_header != "enable" || body["input"]["function"] != "colorization" {
                        return HttpResponse::BadRequest().finish();
                    }
                    HttpResponse::Ok().json(json!({
                        "output": {"task_id": "task-123", "task_status": "PENDING"},
                        "request_id": "r1"
                    }))
                }),
            );
        });

        let task_id = provider_for(base).submit(&job()).await.unwrap();
        assert_eq!(task_id, "task-123");
    }

    #[actix_web::test]
    async fn test_submit_4xx_is_rejected_and_5xx_is_unavailable() {
        let base = spawn_stub_server(|cfg| {
            cfg.route(
                "/bad/services/aigc/image2image/image-synthesis",
                web::post().to(|| async {
                    HttpResponse::BadRequest().json(json!({
                        "code": "InvalidParameter", "message": "url error"
                    }))
                }),
            )
            .route(
                "/down/services/aigc/image2image/image-synthesis",
                web::post().to(|| async { HttpResponse::ServiceUnavailable().finish() }),
            );
        });

        let err = provider_for(format!("{base}/bad"))
            .submit(&job())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ProviderRejected(ref m) if m.contains("InvalidParameter")));

        let err = provider_for(format!("{base}/down"))
            .submit(&job())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));
    }

    #[actix_web::test]
    async fn test_query_maps_errors_to_unavailable() {
        let base = spawn_stub_server(|cfg| {
            cfg.route(
                "/tasks/{id}",
                web::get().to(|path: web::Path<String>| async move {
                    if path.as_str() == "done" {
                        HttpResponse::Ok().json(json!({
                            "output": {
                                "task_id": "done",
                                "task_status": "SUCCEEDED",
                                "results": [{"url": "https://cdn.provider/done.png"}]
                            }
                        }))
                    } else {
                        HttpResponse::InternalServerError().finish()
                    }
                }),
            );
        });

        let provider = provider_for(base);
        let status = provider.query("done").await.unwrap();
        assert_eq!(status.state, ProviderTaskState::Succeeded);

        let err = provider.query("broken").await.unwrap_err();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));
    }

    #[actix_web::test]
    async fn test_unreachable_provider_is_unavailable() {
        // nothing listens on port 9 locally
        let provider = provider_for("http://127.0.0.1:9".into());
        let err = provider.submit(&job()).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));
    }
}
