//! Shared fixtures for unit tests: an in-memory datastore and scripted
//! stand-ins for the provider and object storage.

use crate::error::{AppError, AppResult};
use crate::external::{
    ComputeProvider, DownloadedObject, ObjectStorage, ProviderJob, ProviderTaskState,
    ProviderTaskStatus,
};
use actix_web::{App, HttpServer, web};
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Fresh migrated SQLite database. One connection keeps the in-memory
/// database alive, so transactions never overlap; tests that need a lost
/// race stage it explicitly.
pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .expect("connect sqlite memory db");
    Migrator::up(&db, None).await.expect("run migrations");
    db
}

/// Serves `configure` on an ephemeral local port and returns its base URL.
pub fn spawn_stub_server<F>(configure: F) -> String
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    let server = HttpServer::new(move || App::new().configure(configure.clone()))
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .expect("bind stub server");
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{addr}")
}

#[derive(Debug, Clone)]
pub enum SubmitScript {
    Accept(String),
    Reject(String),
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub enum QueryScript {
    Pending,
    Running,
    Succeeded(String),
    Failed(String),
    Unavailable,
}

pub struct FakeProvider {
    submit: Mutex<SubmitScript>,
    query: Mutex<QueryScript>,
    submit_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn accepting(task_id: &str) -> Self {
        Self {
            submit: Mutex::new(SubmitScript::Accept(task_id.to_string())),
            query: Mutex::new(QueryScript::Running),
            submit_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_submit(&self, script: SubmitScript) {
        *self.submit.lock().unwrap() = script;
    }

    pub fn set_query(&self, script: QueryScript) {
        *self.query.lock().unwrap() = script;
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeProvider for FakeProvider {
    async fn submit(&self, _job: &ProviderJob) -> AppResult<String> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.submit.lock().unwrap().clone();
        match script {
            SubmitScript::Accept(id) => Ok(id),
            SubmitScript::Reject(msg) => Err(AppError::ProviderRejected(msg)),
            SubmitScript::Unavailable(msg) => Err(AppError::ProviderUnavailable(msg)),
        }
    }

    async fn query(&self, _task_id: &str) -> AppResult<ProviderTaskStatus> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.query.lock().unwrap().clone();
        let status = |state, result_ref, message| ProviderTaskStatus {
            state,
            result_ref,
            message,
        };
        match script {
            QueryScript::Pending => Ok(status(ProviderTaskState::Pending, None, None)),
            QueryScript::Running => Ok(status(ProviderTaskState::Running, None, None)),
            QueryScript::Succeeded(url) => {
                Ok(status(ProviderTaskState::Succeeded, Some(url), None))
            }
            QueryScript::Failed(msg) => Ok(status(ProviderTaskState::Failed, None, Some(msg))),
            QueryScript::Unavailable => {
                Err(AppError::ProviderUnavailable("connection reset".into()))
            }
        }
    }
}

pub struct FakeStorage {
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    download_delay: Duration,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::with_download_delay(Duration::ZERO)
    }

    /// Slow downloads let concurrent pollers overlap inside materialization.
    pub fn with_download_delay(download_delay: Duration) -> Self {
        Self {
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            fail_uploads: AtomicBool::new(false),
            fail_downloads: AtomicBool::new(false),
            download_delay,
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> AppResult<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AppError::ExternalApiError("storage quota exceeded".into()));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://storage.test/{bucket}/{path}"))
    }

    async fn download(&self, _url: &str) -> AppResult<DownloadedObject> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(AppError::ExternalApiError("artifact expired".into()));
        }
        Ok(DownloadedObject {
            bytes: vec![0x89, b'P', b'N', b'G', 0, 0, 0, 0],
            content_type: Some("image/png".into()),
        })
    }
}
