//! Board persistence for Qonvo: crash-safe save/load of board documents and
//! their binary attachments into single-file containers, with multi-
//! generation backups, schema migration and legacy-archive compatibility.

mod attachments;
mod error;
mod legacy;
mod manager;
mod migrate;

pub use error::{ErrorCategory, Result, StoreError};
pub use manager::BoardStore;
pub use migrate::SCHEMA_VERSION;

/// A board document tree: an opaque JSON object apart from a known set of
/// attachment-path fields and the nested `dimensions[].board_data` trees.
pub type BoardData = serde_json::Map<String, serde_json::Value>;
