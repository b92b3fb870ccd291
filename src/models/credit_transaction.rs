use crate::entities::{TransactionType, credit_transaction_entity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::PaginatedResponse;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditTransactionResponse {
    pub id: Uuid,
    pub transaction_type: TransactionType,
    /// Signed; negative for debits
    pub amount: i64,
    pub balance_after: i64,
    /// Generation record this movement belongs to, if any
    pub related_entity_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<credit_transaction_entity::Model> for CreditTransactionResponse {
    fn from(m: credit_transaction_entity::Model) -> Self {
        Self {
            id: m.id,
            transaction_type: m.transaction_type,
            amount: m.amount,
            balance_after: m.balance_after,
            related_entity_id: m.related_entity_id,
            description: m.description,
            created_at: m.created_at,
        }
    }
}

pub type CreditTransactionPageResponse = PaginatedResponse<CreditTransactionResponse>;

/// Operator / checkout top-up.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GrantCreditsRequest {
    pub user_id: Uuid,
    /// Credits to add, must be positive
    pub amount: i64,
    /// One of purchase, bonus, adjustment
    pub transaction_type: TransactionType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GrantCreditsResponse {
    pub transaction: CreditTransactionResponse,
    pub balance: i64,
}
