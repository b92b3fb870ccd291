use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    ToSchema,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    #[sea_orm(string_value = "super_resolution")]
    SuperResolution,
    #[sea_orm(string_value = "colorization")]
    Colorization,
    #[sea_orm(string_value = "stylization")]
    Stylization,
    #[sea_orm(string_value = "watermark_removal")]
    WatermarkRemoval,
    #[sea_orm(string_value = "expand")]
    Expand,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::SuperResolution => write!(f, "super_resolution"),
            OperationType::Colorization => write!(f, "colorization"),
            OperationType::Stylization => write!(f, "stylization"),
            OperationType::WatermarkRemoval => write!(f, "watermark_removal"),
            OperationType::Expand => write!(f, "expand"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }

    /// Forward-only lifecycle: pending -> processing -> {completed, failed},
    /// plus pending -> failed when dispatch to the provider fails.
    pub fn can_transition_to(self, next: GenerationStatus) -> bool {
        matches!(
            (self, next),
            (GenerationStatus::Pending, GenerationStatus::Processing)
                | (GenerationStatus::Pending, GenerationStatus::Failed)
                | (GenerationStatus::Processing, GenerationStatus::Completed)
                | (GenerationStatus::Processing, GenerationStatus::Failed)
        )
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationStatus::Pending => write!(f, "pending"),
            GenerationStatus::Processing => write!(f, "processing"),
            GenerationStatus::Completed => write!(f, "completed"),
            GenerationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One submitted generation job.
/// - `parameters` holds the typed operation variant as JSON
/// - `claim_token` / `claimed_at` form the materialization lease
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "generation_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub operation_type: OperationType,
    pub status: GenerationStatus,
    pub input_url: String,
    pub output_url: Option<String>,
    pub credit_consumed: i64,
    pub provider_task_id: Option<String>,
    pub error_message: Option<String>,
    pub parameters: Json,
    pub result_metadata: Option<Json>,
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
