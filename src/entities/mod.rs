pub mod credit_transactions;
pub mod generation_records;

pub use credit_transactions as credit_transaction_entity;
pub use credit_transactions::{TransactionStatus, TransactionType};
pub use generation_records as generation_record_entity;
pub use generation_records::{GenerationStatus, OperationType};
