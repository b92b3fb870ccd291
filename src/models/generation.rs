use crate::entities::{GenerationStatus, OperationType, generation_record_entity};
use crate::error::{AppError, AppResult};
use crate::external::ProviderJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use super::PaginatedResponse;

const MAX_PROMPT_CHARS: usize = 800;

/// Per-operation job parameters, tagged by `operation_type`.
///
/// Each variant carries exactly the fields its provider function accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
pub enum GenerationParams {
    SuperResolution {
        /// 1-4
        #[serde(default = "default_upscale_factor")]
        upscale_factor: u8,
    },
    Colorization {
        #[serde(default)]
        prompt: Option<String>,
    },
    Stylization {
        prompt: String,
        /// 0.0-1.0
        #[serde(default)]
        strength: Option<f32>,
    },
    WatermarkRemoval {
        #[serde(default)]
        prompt: Option<String>,
    },
    Expand {
        /// Each scale is 1.0-2.0
        top_scale: f32,
        bottom_scale: f32,
        left_scale: f32,
        right_scale: f32,
    },
}

fn default_upscale_factor() -> u8 {
    2
}

fn check_prompt(prompt: &str) -> AppResult<()> {
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(AppError::ValidationError(format!(
            "prompt must be at most {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(())
}

impl GenerationParams {
    pub fn operation_type(&self) -> OperationType {
        match self {
            GenerationParams::SuperResolution { .. } => OperationType::SuperResolution,
            GenerationParams::Colorization { .. } => OperationType::Colorization,
            GenerationParams::Stylization { .. } => OperationType::Stylization,
            GenerationParams::WatermarkRemoval { .. } => OperationType::WatermarkRemoval,
            GenerationParams::Expand { .. } => OperationType::Expand,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        match self {
            GenerationParams::SuperResolution { upscale_factor } => {
                if !(1..=4).contains(upscale_factor) {
                    return Err(AppError::ValidationError(
                        "upscale_factor must be between 1 and 4".into(),
                    ));
                }
            }
            GenerationParams::Colorization { prompt }
            | GenerationParams::WatermarkRemoval { prompt } => {
                if let Some(p) = prompt {
                    check_prompt(p)?;
                }
            }
            GenerationParams::Stylization { prompt, strength } => {
                if prompt.trim().is_empty() {
                    return Err(AppError::ValidationError(
                        "stylization requires a prompt".into(),
                    ));
                }
                check_prompt(prompt)?;
                if let Some(s) = strength
                    && !(0.0..=1.0).contains(s)
                {
                    return Err(AppError::ValidationError(
                        "strength must be between 0.0 and 1.0".into(),
                    ));
                }
            }
            GenerationParams::Expand {
                top_scale,
                bottom_scale,
                left_scale,
                right_scale,
            } => {
                if [top_scale, bottom_scale, left_scale, right_scale]
                    .iter()
                    .any(|s| !(1.0..=2.0).contains(*s))
                {
                    return Err(AppError::ValidationError(
                        "expand scales must be between 1.0 and 2.0".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Provider request for this operation applied to `input_url`.
    pub fn to_provider_job(&self, input_url: &str) -> ProviderJob {
        let (function, prompt, parameters) = match self {
            GenerationParams::SuperResolution { upscale_factor } => (
                "super_resolution",
                "Upscale the image.".to_string(),
                json!({ "upscale_factor": upscale_factor }),
            ),
            GenerationParams::Colorization { prompt } => (
                "colorization",
                prompt
                    .clone()
                    .unwrap_or_else(|| "Colorize the image.".to_string()),
                json!({}),
            ),
            GenerationParams::Stylization { prompt, strength } => {
                let parameters = match strength {
                    Some(s) => json!({ "strength": s }),
                    None => json!({}),
                };
                ("stylization_all", prompt.clone(), parameters)
            }
            GenerationParams::WatermarkRemoval { prompt } => (
                "remove_watermark",
                prompt
                    .clone()
                    .unwrap_or_else(|| "Remove the watermark and text.".to_string()),
                json!({}),
            ),
            GenerationParams::Expand {
                top_scale,
                bottom_scale,
                left_scale,
                right_scale,
            } => (
                "expand",
                "Extend the scene naturally.".to_string(),
                json!({
                    "top_scale": top_scale,
                    "bottom_scale": bottom_scale,
                    "left_scale": left_scale,
                    "right_scale": right_scale,
                }),
            ),
        };

        ProviderJob {
            function,
            base_image_url: input_url.to_string(),
            prompt,
            parameters,
        }
    }
}

/// `POST /generation` body: the input image plus the flattened operation variant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateGenerationRequest {
    pub input_url: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateGenerationResponse {
    pub record_id: Uuid,
    pub status: GenerationStatus,
}

/// Snapshot returned by every status read.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerationStatusResponse {
    pub id: Uuid,
    pub status: GenerationStatus,
    pub operation_type: OperationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub credits_used: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<generation_record_entity::Model> for GenerationStatusResponse {
    fn from(m: generation_record_entity::Model) -> Self {
        Self {
            id: m.id,
            status: m.status,
            operation_type: m.operation_type,
            output_url: m.output_url,
            error_message: m.error_message,
            credits_used: m.credit_consumed,
            created_at: m.created_at,
            completed_at: m.completed_at,
        }
    }
}

pub type GenerationPageResponse = PaginatedResponse<GenerationStatusResponse>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_flattened_variant() {
        let body = r#"{
            "input_url": "https://img.example.com/a.png",
            "operation_type": "stylization",
            "prompt": "watercolor",
            "strength": 0.4
        }"#;
        let req: CreateGenerationRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.input_url, "https://img.example.com/a.png");
        assert_eq!(req.params.operation_type(), OperationType::Stylization);
        assert!(req.params.validate().is_ok());
    }

    #[test]
    fn test_super_resolution_defaults_factor() {
        let params: GenerationParams =
            serde_json::from_str(r#"{"operation_type":"super_resolution"}"#).unwrap();
        assert_eq!(params, GenerationParams::SuperResolution { upscale_factor: 2 });
    }

    #[test]
    fn test_unknown_operation_is_rejected() {
        let res: Result<GenerationParams, _> =
            serde_json::from_str(r#"{"operation_type":"teleport"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_validation_ranges() {
        assert!(
            GenerationParams::SuperResolution { upscale_factor: 5 }
                .validate()
                .is_err()
        );
        assert!(
            GenerationParams::Stylization {
                prompt: "  ".into(),
                strength: None
            }
            .validate()
            .is_err()
        );
        assert!(
            GenerationParams::Stylization {
                prompt: "ink".into(),
                strength: Some(1.5)
            }
            .validate()
            .is_err()
        );
        assert!(
            GenerationParams::Expand {
                top_scale: 1.0,
                bottom_scale: 1.5,
                left_scale: 2.5,
                right_scale: 1.0
            }
            .validate()
            .is_err()
        );
        assert!(
            GenerationParams::Colorization {
                prompt: Some("x".repeat(801))
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_provider_job_mapping() {
        let job = GenerationParams::Expand {
            top_scale: 1.5,
            bottom_scale: 1.0,
            left_scale: 1.0,
            right_scale: 2.0,
        }
        .to_provider_job("https://img.example.com/in.jpg");
        assert_eq!(job.function, "expand");
        assert_eq!(job.base_image_url, "https://img.example.com/in.jpg");
        assert_eq!(job.parameters["top_scale"], json!(1.5));

        let job = GenerationParams::WatermarkRemoval { prompt: None }.to_provider_job("u");
        assert_eq!(job.function, "remove_watermark");
        assert!(!job.prompt.is_empty());
        assert_eq!(job.parameters, json!({}));
    }
}
