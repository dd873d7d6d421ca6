//! Storage abstraction for team API keys.
//!
//! Backend crates (relay-store-memory, relay-store-sqlite) implement [`KeyStore`]
//! so the dispatcher and agents never depend on a specific storage engine.

mod store;
pub mod types;

pub use store::KeyStore;
#[cfg(feature = "test-support")]
pub use store::MockKeyStore;
pub use types::*;

use thiserror::Error;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}
