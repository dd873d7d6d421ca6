//! Domain types for key storage.

mod api_keys;
mod ids;

pub use api_keys::*;
pub use ids::*;
