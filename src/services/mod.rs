pub mod generation_service;
pub mod generation_store;
pub mod ledger_service;
pub mod materializer;

pub use generation_service::*;
pub use ledger_service::LedgerService;
pub use materializer::*;
