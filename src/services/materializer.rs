use crate::error::{AppError, AppResult};
use crate::external::ObjectStorage;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MaterializedResult {
    pub url: String,
    pub metadata: serde_json::Value,
}

/// Copies provider-hosted artifacts into owned storage so result URLs outlive
/// the provider's retention window.
#[derive(Clone)]
pub struct Materializer {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match essence.as_deref() {
        Some("image/jpeg") | Some("image/jpg") => "jpeg",
        Some("image/webp") => "webp",
        _ => "png",
    }
}

impl Materializer {
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
        }
    }

    pub fn object_path(user_id: Uuid, record_id: Uuid, extension: &str) -> String {
        format!("{user_id}/{record_id}/result.{extension}")
    }

    /// Every failure is reported as `MaterializationFailed`.
    pub async fn materialize(
        &self,
        result_ref: &str,
        user_id: Uuid,
        record_id: Uuid,
    ) -> AppResult<MaterializedResult> {
        let object = self
            .storage
            .download(result_ref)
            .await
            .map_err(|e| AppError::MaterializationFailed(format!("download: {e}")))?;
        if object.bytes.is_empty() {
            return Err(AppError::MaterializationFailed(
                "download: empty artifact".into(),
            ));
        }

        let extension = extension_for(object.content_type.as_deref());
        let content_type = match extension {
            "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            _ => "image/png",
        };
        let path = Self::object_path(user_id, record_id, extension);
        let size = object.bytes.len();

        let url = self
            .storage
            .upload(&self.bucket, &path, object.bytes, content_type)
            .await
            .map_err(|e| AppError::MaterializationFailed(format!("upload: {e}")))?;

        log::info!("Materialized result of record {record_id} ({size} bytes) to {url}");
        Ok(MaterializedResult {
            url,
            metadata: json!({
                "source_url": result_ref,
                "content_type": content_type,
                "size": size,
                "path": path,
            }),
        })
    }
}
