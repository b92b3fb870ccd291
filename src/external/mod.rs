pub mod compute_provider;
pub mod object_storage;

pub use compute_provider::*;
pub use object_storage::*;
