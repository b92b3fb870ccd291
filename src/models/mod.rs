pub mod common;
pub mod credit_transaction;
pub mod generation;
pub mod pagination;

pub use common::*;
pub use credit_transaction::*;
pub use generation::*;
pub use pagination::*;
